use std::sync::Arc;
use strata::{EventStore, Query};
use uuid::Uuid;

use super::commands::load_existing;
use crate::Error;

#[derive(Debug, Query)]
#[strata(output = u64)]
pub struct GetBalance {
    pub id: Uuid,
}

pub async fn get_balance(
    store: Arc<EventStore>,
    GetBalance { id }: GetBalance,
) -> Result<u64, Error> {
    let account = load_existing(&store, id).await?;
    Ok(account.state().balance)
}
