pub mod commands;
pub mod events;
pub mod queries;

use strata::{Aggregate, Appliers, Configuration, Dependencies, Module};

use crate::Error;
use commands::{deposit, open_account, withdraw, Deposit, OpenAccount, Withdraw};
use events::{AccountOpened, Deposited, Withdrawn};
use queries::{get_balance, GetBalance};

#[derive(Debug, Default)]
pub struct Account {
    pub owner: Option<String>,
    pub balance: u64,
}

impl Aggregate for Account {
    const TYPE: &'static str = "Account";

    fn appliers() -> Appliers<Self> {
        Appliers::new()
            .on(|account: &mut Account, event: AccountOpened| {
                account.owner = Some(event.owner)
            })
            .on(|account: &mut Account, event: Deposited| account.balance += event.amount)
            .on(|account: &mut Account, event: Withdrawn| {
                account.balance = account.balance.saturating_sub(event.amount)
            })
    }
}

pub fn module() -> impl Module<Error> {
    strata::module("accounts", |dependencies: &Dependencies<Error>| {
        let (opening, depositing, withdrawing, reading) = (
            dependencies.event_store.clone(),
            dependencies.event_store.clone(),
            dependencies.event_store.clone(),
            dependencies.event_store.clone(),
        );
        Configuration::new()
            .command(move |command: OpenAccount| open_account(opening.clone(), command))
            .command(move |command: Deposit| deposit(depositing.clone(), command))
            .command(move |command: Withdraw| withdraw(withdrawing.clone(), command))
            .query(move |query: GetBalance| get_balance(reading.clone(), query))
    })
}
