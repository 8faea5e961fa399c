//! Runs the bank, crashes it, and recovers it.
//!
//! The first act runs deposits and transfers against fresh stores and takes a
//! checkpoint. The second act starts a new bank on the same stores; recovery
//! replays the log past the checkpoint, and the balances come back exactly
//! where they were.
//!
//! Run with `RUST_LOG=info` for lifecycle events or `RUST_LOG=debug` for
//! per-frame dispatch.

use durable_actor::setup_tracing;
use durable_actor_sample::system::{Bank, BankError, BankStores};
use tracing::{info, warn};

const AUDIT_LIMIT: i64 = 250;

#[tokio::main]
async fn main() -> Result<(), BankError> {
    setup_tracing();

    let teller_stores = BankStores::in_memory();
    let auditor_stores = BankStores::in_memory();

    info!("Opening the bank");
    let mut bank = Bank::start(teller_stores.clone(), auditor_stores.clone(), AUDIT_LIMIT);

    let balance = bank.deposit("alice", 500).await?;
    info!(account = "alice", balance, "Deposit applied");
    let balance = bank.deposit("bob", 100).await?;
    info!(account = "bob", balance, "Deposit applied");

    let receipt = bank.transfer("alice", "bob", 200).await?;
    info!(
        from_balance = receipt.from_balance,
        to_balance = receipt.to_balance,
        "Transfer approved"
    );

    match bank.transfer("alice", "bob", 280).await {
        Ok(_) => warn!("Over-limit transfer was unexpectedly approved"),
        Err(e) => info!(error = %e, "Over-limit transfer turned down"),
    }

    let position = bank.checkpoint().await?;
    info!(position, "Checkpoint taken; crashing the bank");
    bank.shutdown().await?;

    info!("Reopening on the same stores");
    let mut bank = Bank::start(teller_stores, auditor_stores, AUDIT_LIMIT);
    let alice = bank.balance("alice").await?;
    let bob = bank.balance("bob").await?;
    info!(alice, bob, "Balances recovered");
    assert_eq!((alice, bob), (300, 300));

    let (teller, auditor) = bank.shutdown().await?;
    info!(
        accounts = teller.state().accounts.len(),
        reviewed = auditor.state().reviewed,
        "Bank closed"
    );
    Ok(())
}
