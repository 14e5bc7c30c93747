//! End-to-end lifecycle tests for the ledger
//!
//! Drives events through purchase, refund, cancellation and withdrawal with
//! a manual clock and a recording transfer backend.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use ticket_escrow_core::environment::Clock;
use ticket_escrow_core::{Amount, Identity};
use ticket_escrow_runtime::InMemoryKeyValueStore;
use ticket_escrow_testing::{ManualClock, RecordingTransfer};
use ticket_ledger::{
    EventId, EventStatus, Ledger, LedgerError, LedgerNotification, NewEvent, OrganizerAction,
    REFUND_CUTOFF_SECS,
};

// ============================================================================
// Test Fixtures
// ============================================================================

const HOUR: u64 = 3_600;
const DAY: u64 = 24 * HOUR;

struct Harness {
    ledger: Ledger,
    clock: Arc<ManualClock>,
    transfer: Arc<RecordingTransfer>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let transfer = Arc::new(RecordingTransfer::new());
        let ledger = Ledger::new(
            Arc::new(InMemoryKeyValueStore::new()),
            clock.clone(),
            transfer.clone(),
        );
        Self {
            ledger,
            clock,
            transfer,
        }
    }

    fn now(&self) -> u64 {
        self.clock.unix_now()
    }

    /// Creates an event starting in two days, lasting one hour
    async fn create(&self, price: Amount, capacity: u64) -> (EventId, u64, u64) {
        let start = self.now() + 2 * DAY;
        let end = start + HOUR;
        let id = self
            .ledger
            .create_event(
                &organizer(),
                NewEvent::new("Concert", price, start, end, capacity),
            )
            .await
            .unwrap();
        (id, start, end)
    }

    async fn buy(&self, who: &Identity, id: EventId, quantity: u64, price: Amount) {
        self.ledger
            .buy_ticket(who, id, quantity, price.checked_mul(quantity).unwrap())
            .await
            .unwrap();
    }

    fn notification_names(&self) -> Vec<&'static str> {
        self.ledger
            .notifications()
            .iter()
            .map(|p| p.notification.name())
            .collect()
    }
}

fn organizer() -> Identity {
    Identity::from("organizer")
}

fn one_coin() -> Amount {
    Amount::checked_scaled(1, 18).unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_buy_refund_cancel_scenario() {
    let h = Harness::new();
    let price = one_coin();
    let alice = Identity::from("alice");
    let carol = Identity::from("carol");
    let dave = Identity::from("dave");

    let (id, start, end) = h.create(price, 100).await;
    assert_eq!(id, EventId::new(0));

    h.buy(&carol, id, 50, price).await;
    h.buy(&dave, id, 48, price).await;
    h.buy(&alice, id, 2, price).await;
    assert_eq!(h.ledger.event_status(id).await.unwrap(), EventStatus::SoldOut);

    let refunded = h.ledger.request_refund(&alice, id).await.unwrap();
    assert_eq!(refunded, Amount::checked_scaled(2, 18).unwrap());
    assert_eq!(h.ledger.get_holding(id, &alice).await.unwrap(), 0);
    assert_eq!(h.ledger.get_event(id).await.unwrap().sold_count, 98);
    assert_eq!(h.transfer.total_to(&alice), refunded);

    h.ledger.cancel_event(&organizer(), id).await.unwrap();

    // Inside the last 24 hours: allowed only because the event is canceled
    h.clock.set_unix(start - HOUR);
    let carol_refund = h.ledger.request_refund(&carol, id).await.unwrap();
    assert_eq!(carol_refund, price.checked_mul(50).unwrap());

    // Long after the end as well
    h.clock.set_unix(end + 30 * DAY);
    let dave_refund = h.ledger.request_refund(&dave, id).await.unwrap();
    assert_eq!(dave_refund, price.checked_mul(48).unwrap());

    let event = h.ledger.get_event(id).await.unwrap();
    assert_eq!(event.sold_count, 0);
    assert!(event.is_canceled);
    assert_eq!(h.ledger.escrowed_balance(id).await.unwrap(), Amount::ZERO);
    assert_eq!(h.transfer.total(), price.checked_mul(100).unwrap());

    assert_eq!(
        h.ledger.withdraw_funds(&organizer(), id).await.unwrap_err(),
        LedgerError::EventCanceled { event_id: id }
    );

    assert_eq!(
        h.notification_names(),
        vec![
            "EventCreated",
            "TicketPurchased",
            "TicketPurchased",
            "TicketPurchased",
            "RefundIssued",
            "EventCanceled",
            "RefundIssued",
            "RefundIssued",
        ]
    );
}

#[tokio::test]
async fn test_withdrawal_happens_exactly_once_after_end() {
    let h = Harness::new();
    let price = Amount::from_units(250);
    let bob = Identity::from("bob");

    let (id, _, end) = h.create(price, 10).await;
    h.buy(&bob, id, 4, price).await;

    h.clock.set_unix(end);
    assert!(matches!(
        h.ledger.withdraw_funds(&organizer(), id).await.unwrap_err(),
        LedgerError::EventNotEnded { now, end_time, .. } if now == end && end_time == end
    ));

    assert!(matches!(
        h.ledger.withdraw_funds(&bob, id).await.unwrap_err(),
        LedgerError::Unauthorized { action: OrganizerAction::Withdraw, .. }
    ));

    h.clock.set_unix(end + 1);
    let paid = h.ledger.withdraw_funds(&organizer(), id).await.unwrap();
    assert_eq!(paid, Amount::from_units(1_000));
    assert_eq!(h.transfer.total_to(&organizer()), paid);
    assert_eq!(h.ledger.escrowed_balance(id).await.unwrap(), Amount::ZERO);

    assert_eq!(
        h.ledger.withdraw_funds(&organizer(), id).await.unwrap_err(),
        LedgerError::AlreadyWithdrawn { event_id: id }
    );
    assert_eq!(h.transfer.payouts().len(), 1);

    let last = h.ledger.notifications().pop().unwrap().notification;
    assert_eq!(
        last,
        LedgerNotification::FundsWithdrawn {
            event_id: id,
            organizer: organizer(),
            amount: paid,
        }
    );
}

#[tokio::test]
async fn test_withdrawal_pays_only_tickets_still_held() {
    let h = Harness::new();
    let price = Amount::from_units(7);
    let alice = Identity::from("alice");
    let bob = Identity::from("bob");

    let (id, _, end) = h.create(price, 10).await;
    h.buy(&alice, id, 3, price).await;
    h.buy(&bob, id, 5, price).await;
    h.ledger.request_refund(&alice, id).await.unwrap();

    h.clock.set_unix(end + 1);
    let paid = h.ledger.withdraw_funds(&organizer(), id).await.unwrap();
    assert_eq!(paid, Amount::from_units(35));
}

#[tokio::test]
async fn test_refund_window_closes_a_day_before_start() {
    let h = Harness::new();
    let price = Amount::from_units(100);
    let alice = Identity::from("alice");
    let bob = Identity::from("bob");

    let (id, start, _) = h.create(price, 10).await;
    h.buy(&alice, id, 1, price).await;
    h.buy(&bob, id, 1, price).await;

    h.clock.set_unix(start - 25 * HOUR);
    assert_eq!(
        h.ledger.request_refund(&alice, id).await.unwrap(),
        Amount::from_units(100)
    );

    h.clock.set_unix(start - 23 * HOUR);
    let err = h.ledger.request_refund(&bob, id).await.unwrap_err();
    assert_eq!(
        err,
        LedgerError::RefundWindowClosed {
            event_id: id,
            deadline: start - REFUND_CUTOFF_SECS,
            now: start - 23 * HOUR,
        }
    );
    assert_eq!(h.ledger.get_holding(id, &bob).await.unwrap(), 1);

    // Alice has nothing left to refund
    assert!(matches!(
        h.ledger.request_refund(&alice, id).await.unwrap_err(),
        LedgerError::NoTicketsHeld { .. }
    ));
}

#[tokio::test]
async fn test_cancellation_rules() {
    let h = Harness::new();
    let (id, start, _) = h.create(Amount::from_units(1), 5).await;
    let stranger = Identity::from("mallory");

    assert!(matches!(
        h.ledger.cancel_event(&stranger, id).await.unwrap_err(),
        LedgerError::Unauthorized { action: OrganizerAction::Cancel, .. }
    ));

    h.clock.set_unix(start);
    assert!(matches!(
        h.ledger.cancel_event(&organizer(), id).await.unwrap_err(),
        LedgerError::EventAlreadyStarted { .. }
    ));
    assert!(matches!(
        h.ledger.cancel_event(&stranger, id).await.unwrap_err(),
        LedgerError::Unauthorized { .. }
    ));

    let (second, _, _) = h.create(Amount::from_units(1), 5).await;
    h.ledger.cancel_event(&organizer(), second).await.unwrap();
    assert_eq!(
        h.ledger.cancel_event(&organizer(), second).await.unwrap_err(),
        LedgerError::AlreadyCanceled { event_id: second }
    );
    assert_eq!(
        h.ledger
            .buy_ticket(&stranger, second, 1, Amount::from_units(1))
            .await
            .unwrap_err(),
        LedgerError::EventCanceled { event_id: second }
    );
}

#[tokio::test]
async fn test_purchases_stop_after_end() {
    let h = Harness::new();
    let price = Amount::from_units(3);
    let bob = Identity::from("bob");
    let (id, _, end) = h.create(price, 5).await;

    h.clock.set_unix(end);
    h.buy(&bob, id, 1, price).await;

    h.clock.set_unix(end + 1);
    assert!(matches!(
        h.ledger.buy_ticket(&bob, id, 1, price).await.unwrap_err(),
        LedgerError::EventEnded { .. }
    ));
    assert_eq!(h.ledger.event_status(id).await.unwrap(), EventStatus::Ended);
}

#[tokio::test]
async fn test_sold_out_reports_remaining() {
    let h = Harness::new();
    let price = Amount::from_units(10);
    let bob = Identity::from("bob");
    let (id, _, _) = h.create(price, 5).await;

    h.buy(&bob, id, 2, price).await;
    let err = h
        .ledger
        .buy_ticket(&bob, id, 4, Amount::from_units(40))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("tickets remaining: 3"));

    // A rejected purchase changes nothing
    assert_eq!(h.ledger.get_holding(id, &bob).await.unwrap(), 2);
    assert_eq!(h.notification_names().len(), 2);
}

#[tokio::test]
async fn test_invalid_creation_is_rejected() {
    let h = Harness::new();
    let now = h.now();

    let err = h
        .ledger
        .create_event(
            &organizer(),
            NewEvent::new("Past", Amount::from_units(1), now, now + HOUR, 10),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid start_time: Event date must be in the future"
    );
    assert_eq!(h.ledger.event_count().await.unwrap(), 0);
    assert!(h.ledger.notifications().is_empty());
}

#[tokio::test]
async fn test_listing_and_holdings() {
    let h = Harness::new();
    let price = Amount::from_units(2);
    let bob = Identity::from("bob");

    let (first, _, _) = h.create(price, 3).await;
    let (second, _, _) = h.create(price, 3).await;
    let (third, _, _) = h.create(price, 3).await;
    assert_eq!((first, second, third), (EventId::new(0), EventId::new(1), EventId::new(2)));

    h.buy(&bob, first, 1, price).await;
    h.buy(&bob, third, 3, price).await;

    let ids: Vec<EventId> = h.ledger.list_events().await.unwrap().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first, second, third]);
    assert_eq!(h.ledger.event_count().await.unwrap(), 3);

    let held: Vec<(EventId, u64)> = h
        .ledger
        .holdings_of(&bob)
        .await
        .unwrap()
        .iter()
        .map(|holding| (holding.event_id, holding.quantity))
        .collect();
    assert_eq!(held, vec![(first, 1), (third, 3)]);
    assert_eq!(h.ledger.event_status(third).await.unwrap(), EventStatus::SoldOut);
}

#[tokio::test]
async fn test_subscribers_see_notifications_in_order() {
    let h = Harness::new();
    let mut receiver = h.ledger.subscribe();
    let price = Amount::from_units(5);
    let bob = Identity::from("bob");

    let (id, _, _) = h.create(price, 5).await;
    h.buy(&bob, id, 1, price).await;
    h.ledger.request_refund(&bob, id).await.unwrap();

    let mut sequences = Vec::new();
    for _ in 0..3 {
        let published = receiver.recv().await.unwrap();
        assert_eq!(published.notification.event_id(), id);
        sequences.push(published.sequence);
    }
    assert_eq!(sequences, vec![0, 1, 2]);
}
