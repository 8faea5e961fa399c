//! End-to-end bank flows: transfer approval through the auditor, rejection
//! paths, and recovery after a simulated crash.

use durable_actor_sample::system::{Bank, BankError, BankStores};

const AUDIT_LIMIT: i64 = 250;

fn fresh_bank() -> (Bank, BankStores, BankStores) {
    let teller_stores = BankStores::in_memory();
    let auditor_stores = BankStores::in_memory();
    let bank = Bank::start(teller_stores.clone(), auditor_stores.clone(), AUDIT_LIMIT);
    (bank, teller_stores, auditor_stores)
}

#[tokio::test]
async fn approved_transfer_moves_money() {
    let (mut bank, _, _) = fresh_bank();
    bank.deposit("alice", 500).await.unwrap();
    bank.deposit("bob", 100).await.unwrap();

    let receipt = bank.transfer("alice", "bob", 200).await.unwrap();
    assert_eq!(receipt.from_balance, 300);
    assert_eq!(receipt.to_balance, 300);

    assert_eq!(bank.balance("alice").await.unwrap(), 300);
    assert_eq!(bank.balance("bob").await.unwrap(), 300);

    let (teller, auditor) = bank.shutdown().await.unwrap();
    assert!(teller.state().pending.is_empty());
    assert_eq!(auditor.state().reviewed, 1);
}

#[tokio::test]
async fn over_limit_transfer_is_denied_by_the_auditor() {
    let (mut bank, _, _) = fresh_bank();
    bank.deposit("alice", 500).await.unwrap();
    bank.deposit("bob", 100).await.unwrap();

    let result = bank.transfer("alice", "bob", 400).await;
    match result {
        Err(BankError::Rejected(reason)) => assert!(reason.contains("audit denied")),
        other => panic!("expected rejection, got {other:?}"),
    }

    // Nothing moved, and the parked transfer was cleaned up.
    assert_eq!(bank.balance("alice").await.unwrap(), 500);
    assert_eq!(bank.balance("bob").await.unwrap(), 100);
    let (teller, auditor) = bank.shutdown().await.unwrap();
    assert!(teller.state().pending.is_empty());
    assert_eq!(auditor.state().reviewed, 1);
}

#[tokio::test]
async fn insufficient_funds_never_reach_the_auditor() {
    let (mut bank, _, _) = fresh_bank();
    bank.deposit("alice", 50).await.unwrap();
    bank.deposit("bob", 10).await.unwrap();

    let result = bank.transfer("alice", "bob", 100).await;
    match result {
        Err(BankError::Rejected(reason)) => assert!(reason.contains("holds 50")),
        other => panic!("expected rejection, got {other:?}"),
    }

    let (_, auditor) = bank.shutdown().await.unwrap();
    assert_eq!(auditor.state().reviewed, 0);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let (mut bank, _, _) = fresh_bank();
    assert!(matches!(
        bank.deposit("alice", -5).await,
        Err(BankError::Rejected(_))
    ));
    assert!(matches!(
        bank.balance("nobody").await,
        Err(BankError::Rejected(_))
    ));
    bank.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_after_checkpoint_recovers_balances() {
    let (mut bank, teller_stores, auditor_stores) = fresh_bank();
    bank.deposit("alice", 500).await.unwrap();
    bank.deposit("bob", 100).await.unwrap();
    bank.transfer("alice", "bob", 200).await.unwrap();
    bank.checkpoint().await.unwrap();
    bank.deposit("bob", 25).await.unwrap(); // past the checkpoint, replayed
    bank.shutdown().await.unwrap();

    let mut bank = Bank::start(teller_stores, auditor_stores, AUDIT_LIMIT);
    assert_eq!(bank.balance("alice").await.unwrap(), 300);
    assert_eq!(bank.balance("bob").await.unwrap(), 325);
    // Seeded at first start and carried through recovery.
    assert_eq!(bank.balance("reserve").await.unwrap(), 1_000);
    bank.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_without_any_checkpoint_replays_from_scratch() {
    let (mut bank, teller_stores, auditor_stores) = fresh_bank();
    bank.deposit("alice", 500).await.unwrap();
    bank.transfer("alice", "reserve", 150).await.unwrap();
    bank.shutdown().await.unwrap();

    let mut bank = Bank::start(teller_stores, auditor_stores, AUDIT_LIMIT);
    assert_eq!(bank.balance("alice").await.unwrap(), 350);
    assert_eq!(bank.balance("reserve").await.unwrap(), 1_150);
    let (teller, _) = bank.shutdown().await.unwrap();
    assert!(teller.state().pending.is_empty());
}
