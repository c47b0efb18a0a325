use std::sync::PoisonError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Strata(#[from] strata::Error),
    #[error("Account {0} does not exist")]
    UnknownAccount(Uuid),
    #[error("Account {0} already exists")]
    AccountExists(Uuid),
    #[error("Insufficient funds on account {0}")]
    InsufficientFunds(Uuid),
    #[error("Amounts must be positive")]
    InvalidAmount,
    #[error("Concurrency error: the {0} mutex has been poisoned")]
    Poisoned(&'static str),
}

impl<G> From<PoisonError<G>> for Error {
    fn from(_: PoisonError<G>) -> Self {
        Self::Poisoned("ledger")
    }
}
