//! Failure and recovery tests
//!
//! A failed outbound transfer must leave the ledger exactly as it was, and
//! a flushed ledger must come back intact from its snapshot file.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use std::time::Duration;
use ticket_escrow_core::environment::Clock;
use ticket_escrow_core::{Amount, Identity};
use ticket_escrow_runtime::{InMemoryKeyValueStore, StoreConfig};
use ticket_escrow_testing::{ManualClock, RecordingTransfer};
use ticket_ledger::{EventId, Ledger, LedgerConfig, LedgerError, LedgerNotification, NewEvent};

const HOUR: u64 = 3_600;
const DAY: u64 = 24 * HOUR;

fn organizer() -> Identity {
    Identity::from("organizer")
}

fn concert(clock: &ManualClock) -> NewEvent {
    let start = clock.unix_now() + 2 * DAY;
    NewEvent::new("Concert", Amount::from_units(40), start, start + HOUR, 20)
}

// ============================================================================
// Rollback
// ============================================================================

#[tokio::test]
async fn test_failed_refund_transfer_rolls_back() {
    let clock = Arc::new(ManualClock::default());
    let transfer = Arc::new(RecordingTransfer::new());
    let ledger = Ledger::new(
        Arc::new(InMemoryKeyValueStore::new()),
        clock.clone(),
        transfer.clone(),
    );
    let bob = Identity::from("bob");

    let id = ledger.create_event(&organizer(), concert(&clock)).await.unwrap();
    ledger.buy_ticket(&bob, id, 2, Amount::from_units(80)).await.unwrap();
    let before = ledger.get_event(id).await.unwrap();
    let published = ledger.notifications().len();

    transfer.fail_next(1);
    let err = ledger.request_refund(&bob, id).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::TransferFailed { ref to, amount, .. } if *to == bob && amount == Amount::from_units(80)
    ));
    assert!(!err.is_retryable());

    assert_eq!(ledger.get_event(id).await.unwrap(), before);
    assert_eq!(ledger.get_holding(id, &bob).await.unwrap(), 2);
    assert_eq!(ledger.notifications().len(), published);
    assert!(transfer.payouts().is_empty());

    // The holder can simply ask again
    assert_eq!(
        ledger.request_refund(&bob, id).await.unwrap(),
        Amount::from_units(80)
    );
    assert_eq!(ledger.get_holding(id, &bob).await.unwrap(), 0);
    assert_eq!(transfer.total_to(&bob), Amount::from_units(80));
}

#[tokio::test]
async fn test_failed_withdrawal_can_be_retried() {
    let clock = Arc::new(ManualClock::default());
    let transfer = Arc::new(RecordingTransfer::new());
    let ledger = Ledger::new(
        Arc::new(InMemoryKeyValueStore::new()),
        clock.clone(),
        transfer.clone(),
    );

    let id = ledger.create_event(&organizer(), concert(&clock)).await.unwrap();
    ledger
        .buy_ticket(&Identity::from("carol"), id, 5, Amount::from_units(200))
        .await
        .unwrap();
    clock.set_unix(ledger.get_event(id).await.unwrap().end_time + 1);

    transfer.fail_always(true);
    assert!(matches!(
        ledger.withdraw_funds(&organizer(), id).await.unwrap_err(),
        LedgerError::TransferFailed { .. }
    ));
    assert!(!ledger.get_event(id).await.unwrap().funds_withdrawn);
    assert_eq!(ledger.escrowed_balance(id).await.unwrap(), Amount::from_units(200));

    transfer.fail_always(false);
    assert_eq!(
        ledger.withdraw_funds(&organizer(), id).await.unwrap(),
        Amount::from_units(200)
    );
    assert!(ledger.get_event(id).await.unwrap().funds_withdrawn);
    assert_eq!(transfer.total_to(&organizer()), Amount::from_units(200));
}

// ============================================================================
// Unknown transfer outcomes
// ============================================================================

fn slow_ack_ledger(clock: &Arc<ManualClock>) -> (Ledger, Arc<RecordingTransfer>) {
    let transfer = Arc::new(RecordingTransfer::new().with_ack_delay(Duration::from_millis(300)));
    let ledger = Ledger::with_store_config(
        Arc::new(InMemoryKeyValueStore::new()),
        clock.clone(),
        transfer.clone(),
        StoreConfig::default().with_transfer_timeout(Duration::from_millis(50)),
    );
    (ledger, transfer)
}

#[tokio::test]
async fn test_unconfirmed_withdrawal_is_never_paid_twice() {
    let clock = Arc::new(ManualClock::default());
    let (ledger, transfer) = slow_ack_ledger(&clock);

    let id = ledger.create_event(&organizer(), concert(&clock)).await.unwrap();
    ledger
        .buy_ticket(&Identity::from("carol"), id, 3, Amount::from_units(120))
        .await
        .unwrap();
    clock.set_unix(ledger.get_event(id).await.unwrap().end_time + 1);

    let err = ledger.withdraw_funds(&organizer(), id).await.unwrap_err();
    assert_eq!(
        err,
        LedgerError::TransferUnconfirmed {
            to: organizer(),
            amount: Amount::from_units(120),
        }
    );
    assert!(!err.is_retryable());

    // The withdrawal stays applied
    assert!(ledger.get_event(id).await.unwrap().funds_withdrawn);
    assert_eq!(ledger.escrowed_balance(id).await.unwrap(), Amount::ZERO);
    assert_eq!(
        ledger.withdraw_funds(&organizer(), id).await.unwrap_err(),
        LedgerError::AlreadyWithdrawn { event_id: id }
    );

    assert_eq!(transfer.payouts().len(), 1);
    assert_eq!(transfer.total_to(&organizer()), Amount::from_units(120));
    assert!(
        !ledger
            .notifications()
            .iter()
            .any(|p| matches!(p.notification, LedgerNotification::FundsWithdrawn { .. }))
    );
}

#[tokio::test]
async fn test_unconfirmed_refund_is_never_paid_twice() {
    let clock = Arc::new(ManualClock::default());
    let (ledger, transfer) = slow_ack_ledger(&clock);
    let bob = Identity::from("bob");

    let id = ledger.create_event(&organizer(), concert(&clock)).await.unwrap();
    ledger.buy_ticket(&bob, id, 2, Amount::from_units(80)).await.unwrap();

    assert!(matches!(
        ledger.request_refund(&bob, id).await.unwrap_err(),
        LedgerError::TransferUnconfirmed { ref to, amount } if *to == bob && amount == Amount::from_units(80)
    ));
    assert_eq!(ledger.get_holding(id, &bob).await.unwrap(), 0);
    assert_eq!(ledger.get_event(id).await.unwrap().sold_count, 0);
    assert_eq!(
        ledger.request_refund(&bob, id).await.unwrap_err(),
        LedgerError::NoTicketsHeld { event_id: id, holder: bob.clone() }
    );
    assert_eq!(transfer.total_to(&bob), Amount::from_units(80));
}

// ============================================================================
// Abandoned callers
// ============================================================================

#[tokio::test]
async fn test_abandoned_refund_still_pays_and_publishes() {
    let clock = Arc::new(ManualClock::default());
    let transfer = Arc::new(RecordingTransfer::new().with_delay(Duration::from_millis(200)));
    let ledger = Ledger::new(
        Arc::new(InMemoryKeyValueStore::new()),
        clock.clone(),
        transfer.clone(),
    );
    let bob = Identity::from("bob");

    let id = ledger.create_event(&organizer(), concert(&clock)).await.unwrap();
    ledger.buy_ticket(&bob, id, 2, Amount::from_units(80)).await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), ledger.request_refund(&bob, id)).await;
    assert!(abandoned.is_err());

    // Reads wait for the event partition, which the refund still holds
    let event = ledger.get_event(id).await.unwrap();
    assert_eq!(event.sold_count, 0);
    assert_eq!(ledger.get_holding(id, &bob).await.unwrap(), 0);
    assert_eq!(transfer.total_to(&bob), Amount::from_units(80));
    assert_eq!(ledger.escrowed_balance(id).await.unwrap(), Amount::ZERO);

    let last = ledger.notifications().pop().unwrap();
    assert_eq!(
        last.notification,
        LedgerNotification::RefundIssued {
            event_id: id,
            holder: bob.clone(),
            amount: Amount::from_units(80),
        }
    );
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = LedgerConfig {
        data_path: Some(dir.path().join("ledger.snapshot")),
        ..LedgerConfig::default()
    };
    let clock = Arc::new(ManualClock::default());
    let bob = Identity::from("bob");

    let id = {
        let ledger = Ledger::open(&config, clock.clone(), Arc::new(RecordingTransfer::new()))
            .await
            .unwrap();
        let id = ledger.create_event(&organizer(), concert(&clock)).await.unwrap();
        ledger.buy_ticket(&bob, id, 3, Amount::from_units(120)).await.unwrap();
        ledger.cancel_event(&organizer(), id).await.unwrap();
        ledger.shutdown().await.unwrap();
        id
    };

    let reopened = Ledger::open(&config, clock.clone(), Arc::new(RecordingTransfer::new()))
        .await
        .unwrap();

    let event = reopened.get_event(id).await.unwrap();
    assert_eq!(event.sold_count, 3);
    assert!(event.is_canceled);
    assert_eq!(reopened.get_holding(id, &bob).await.unwrap(), 3);
    assert_eq!(reopened.event_count().await.unwrap(), 1);

    // The id counter survived too
    let next = reopened
        .create_event(&organizer(), concert(&clock))
        .await
        .unwrap();
    assert_eq!(next, EventId::new(1));

    assert_eq!(
        reopened.request_refund(&bob, id).await.unwrap(),
        Amount::from_units(120)
    );
}

#[tokio::test]
async fn test_corrupt_snapshot_is_a_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.snapshot");
    std::fs::write(&path, b"not a snapshot").unwrap();

    let config = LedgerConfig {
        data_path: Some(path),
        ..LedgerConfig::default()
    };
    let result = Ledger::open(
        &config,
        Arc::new(ManualClock::default()),
        Arc::new(RecordingTransfer::new()),
    )
    .await;

    assert!(matches!(result, Err(LedgerError::Storage(_))));
}

#[tokio::test]
async fn test_payout_is_durable_without_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config = LedgerConfig {
        data_path: Some(dir.path().join("ledger.snapshot")),
        ..LedgerConfig::default()
    };
    let clock = Arc::new(ManualClock::default());

    let id = {
        let ledger = Ledger::open(&config, clock.clone(), Arc::new(RecordingTransfer::new()))
            .await
            .unwrap();
        let id = ledger.create_event(&organizer(), concert(&clock)).await.unwrap();
        ledger
            .buy_ticket(&Identity::from("dave"), id, 1, Amount::from_units(40))
            .await
            .unwrap();
        clock.set_unix(ledger.get_event(id).await.unwrap().end_time + 1);
        ledger.withdraw_funds(&organizer(), id).await.unwrap();
        // Dropped without shutdown, as after a crash
        id
    };

    let reopened = Ledger::open(&config, clock.clone(), Arc::new(RecordingTransfer::new()))
        .await
        .unwrap();
    assert!(reopened.get_event(id).await.unwrap().funds_withdrawn);
    assert_eq!(
        reopened.withdraw_funds(&organizer(), id).await.unwrap_err(),
        LedgerError::AlreadyWithdrawn { event_id: id }
    );
}
