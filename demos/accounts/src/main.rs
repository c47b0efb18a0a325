mod accounts;
mod error;
mod ledger;

use futures_util::TryStreamExt;
use strata::{Application, EventEnvelope, EventStream, PeriodFilter};

use accounts::commands::{Deposit, OpenAccount, Withdraw};
use accounts::queries::GetBalance;
pub use error::Error;
use ledger::PrintLedger;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let app = Application::in_memory()
        .module(accounts::module())
        .module(ledger::module())
        .on_event_error(|error: &Error, envelope: &EventEnvelope| {
            eprintln!("{} was not handled: {error}", envelope.event_name())
        })
        .build()?;
    app.start().await?;

    let commands = app.commands();
    let alice = commands.execute(OpenAccount { owner: "alice".into() }).await?;
    let bob = commands.execute(OpenAccount { owner: "bob".into() }).await?;
    commands.execute(Deposit { id: alice, amount: 120 }).await?;
    commands.execute(Deposit { id: bob, amount: 40 }).await?;
    commands.execute(Withdraw { id: alice, amount: 30 }).await?;

    if let Err(error) = commands.execute(Withdraw { id: bob, amount: 100 }).await {
        println!("Rejected: {error}");
    }

    let balance = app.queries().execute(GetBalance { id: alice }).await?;
    println!("Balance of alice: {balance}");
    print!("{}", app.queries().execute(PrintLedger).await?);

    let history = app
        .event_store()
        .get_envelopes(&EventStream::new("Account", alice.to_string()))
        .await?;
    for envelope in history {
        println!(
            "{} v{} {} {}",
            envelope.stream(),
            envelope.version(),
            envelope.event_name(),
            envelope.event().payload(),
        );
    }

    let mut all = app.event_store().get_all_envelopes(PeriodFilter::default());
    let mut count = 0;
    while let Some(batch) = all.try_next().await? {
        count += batch.len();
    }
    println!("{count} event(s) stored");

    app.shutdown().await?;
    Ok(())
}
