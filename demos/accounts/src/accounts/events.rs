use serde::{Deserialize, Serialize};
use strata::Event;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Event)]
pub struct AccountOpened {
    pub id: Uuid,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Event)]
#[strata(version = 2)]
pub struct Deposited {
    pub id: Uuid,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Event)]
pub struct Withdrawn {
    pub id: Uuid,
    pub amount: u64,
}
