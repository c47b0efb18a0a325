use std::sync::Arc;
use strata::{AggregateRoot, AppendOptions, Command, EventStore};
use uuid::Uuid;

use super::events::{AccountOpened, Deposited, Withdrawn};
use super::Account;
use crate::Error;

#[derive(Debug, Command)]
#[strata(output = Uuid)]
pub struct OpenAccount {
    pub owner: String,
}

pub async fn open_account(store: Arc<EventStore>, command: OpenAccount) -> Result<Uuid, Error> {
    let id = Uuid::new_v4();
    let mut account = store.load_aggregate::<Account>(id.to_string()).await?;
    if account.version() > 0 {
        return Err(Error::AccountExists(id));
    }
    account.record(AccountOpened {
        id,
        owner: command.owner,
    })?;
    store
        .save_aggregate(&mut account, AppendOptions::default())
        .await?;
    Ok(id)
}

#[derive(Debug, Command)]
#[strata(output = u64)]
pub struct Deposit {
    pub id: Uuid,
    pub amount: u64,
}

pub async fn deposit(
    store: Arc<EventStore>,
    Deposit { id, amount }: Deposit,
) -> Result<u64, Error> {
    if amount == 0 {
        return Err(Error::InvalidAmount);
    }
    let mut account = load_existing(&store, id).await?;
    account.record(Deposited { id, amount })?;
    store
        .save_aggregate(&mut account, AppendOptions::default().causation_id("Deposit"))
        .await?;
    Ok(account.state().balance)
}

#[derive(Debug, Command)]
#[strata(output = u64)]
pub struct Withdraw {
    pub id: Uuid,
    pub amount: u64,
}

pub async fn withdraw(
    store: Arc<EventStore>,
    Withdraw { id, amount }: Withdraw,
) -> Result<u64, Error> {
    if amount == 0 {
        return Err(Error::InvalidAmount);
    }
    let mut account = load_existing(&store, id).await?;
    if account.state().balance < amount {
        return Err(Error::InsufficientFunds(id));
    }
    account.record(Withdrawn { id, amount })?;
    store
        .save_aggregate(&mut account, AppendOptions::default().causation_id("Withdraw"))
        .await?;
    Ok(account.state().balance)
}

pub(super) async fn load_existing(
    store: &EventStore,
    id: Uuid,
) -> Result<AggregateRoot<Account>, Error> {
    let account = store.load_aggregate::<Account>(id.to_string()).await?;
    if account.version() == 0 {
        Err(Error::UnknownAccount(id))
    } else {
        Ok(account)
    }
}
