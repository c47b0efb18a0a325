use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use strata::{Configuration, Dependencies, EventEnvelope, Module, Query};
use uuid::Uuid;

use crate::accounts::events::{AccountOpened, Deposited, Withdrawn};
use crate::Error;

/// A read model of every account, kept up to date from the account events.
#[derive(Debug, Default)]
pub struct Ledger {
    accounts: BTreeMap<Uuid, Line>,
    entries: usize,
}

#[derive(Debug, Clone)]
pub struct Line {
    pub owner: String,
    pub balance: u64,
}

impl Ledger {
    fn line(&mut self, id: Uuid) -> Result<&mut Line, Error> {
        self.accounts.get_mut(&id).ok_or(Error::UnknownAccount(id))
    }
}

impl Display for Ledger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} account(s), {} entries", self.accounts.len(), self.entries)?;
        for (id, line) in &self.accounts {
            writeln!(f, "  {id} {:<10} {:>8}", line.owner, line.balance)?;
        }
        Ok(())
    }
}

#[derive(Debug, Query)]
#[strata(output = String)]
pub struct PrintLedger;

pub fn module() -> impl Module<Error> {
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    strata::module("ledger", move |_: &Dependencies<Error>| {
        let (opened, deposited, withdrawn, printed) =
            (ledger.clone(), ledger.clone(), ledger.clone(), ledger.clone());
        Configuration::new()
            .on(move |event: AccountOpened, _: EventEnvelope| {
                let ledger = opened.clone();
                async move {
                    let mut ledger = ledger.lock()?;
                    ledger.entries += 1;
                    ledger.accounts.insert(
                        event.id,
                        Line {
                            owner: event.owner,
                            balance: 0,
                        },
                    );
                    Ok::<(), Error>(())
                }
            })
            .on(move |event: Deposited, _: EventEnvelope| {
                let ledger = deposited.clone();
                async move {
                    let mut ledger = ledger.lock()?;
                    ledger.entries += 1;
                    ledger.line(event.id)?.balance += event.amount;
                    Ok::<(), Error>(())
                }
            })
            .on(move |event: Withdrawn, _: EventEnvelope| {
                let ledger = withdrawn.clone();
                async move {
                    let mut ledger = ledger.lock()?;
                    ledger.entries += 1;
                    let line = ledger.line(event.id)?;
                    line.balance = line.balance.saturating_sub(event.amount);
                    Ok::<(), Error>(())
                }
            })
            .query(move |_: PrintLedger| {
                let ledger = printed.clone();
                async move {
                    let summary = ledger.lock()?.to_string();
                    Ok::<_, Error>(summary)
                }
            })
    })
}
