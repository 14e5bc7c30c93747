//! The ledger facade.
//!
//! [`Ledger`] is what callers hold: it turns each public operation into one
//! transaction on the runtime [`Store`], picks the records the transaction
//! may touch, and maps runtime failures onto [`LedgerError`].

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::notification::LedgerNotification;
use crate::reducer::{EventReducer, LedgerCommand, LedgerEnvironment, Outcome};
use crate::repository::{LedgerRepository, ScopeKey};
use crate::types::{Event, EventId, EventStatus, Holding, NewEvent};
use std::sync::Arc;
use std::time::Duration;
use ticket_escrow_core::environment::Clock;
use ticket_escrow_core::kv_store::KeyValueStore;
use ticket_escrow_core::transfer::ValueTransfer;
use ticket_escrow_core::{Amount, Identity};
use ticket_escrow_runtime::{
    HealthCheck, HealthReport, InMemoryKeyValueStore, Published, SnapshotFileStore, Store,
    StoreConfig,
};
use tokio::sync::broadcast;

/// Runtime store specialised to the ledger
pub type LedgerStore = Store<EventReducer, LedgerRepository>;

/// Ticket-sale escrow ledger
///
/// Every mutating call is one atomic transaction scoped to a single event
/// (plus the caller's holding where relevant). Calls on different events
/// run in parallel; calls on the same event are serialized with a bounded
/// wait, after which they fail with [`LedgerError::Busy`].
pub struct Ledger {
    store: LedgerStore,
    shutdown_timeout: Duration,
}

impl Ledger {
    /// Creates a ledger over `kv` with default settings
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn ValueTransfer>,
    ) -> Self {
        Self::with_store_config(kv, clock, transfer, StoreConfig::default())
    }

    /// Creates a ledger over `kv` with explicit runtime settings
    #[must_use]
    pub fn with_store_config(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn ValueTransfer>,
        config: StoreConfig,
    ) -> Self {
        let shutdown_timeout = config.default_shutdown_timeout;
        let store = Store::with_config(
            EventReducer,
            LedgerEnvironment::new(clock),
            Arc::new(LedgerRepository::new(kv)),
            transfer,
            config,
        );
        Self {
            store,
            shutdown_timeout,
        }
    }

    /// Opens the ledger described by `config`.
    ///
    /// Uses a [`SnapshotFileStore`] at `config.data_path` when set and an
    /// in-memory store otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] if the snapshot cannot be loaded.
    pub async fn open(
        config: &LedgerConfig,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn ValueTransfer>,
    ) -> Result<Self, LedgerError> {
        let kv: Arc<dyn KeyValueStore> = match &config.data_path {
            Some(path) => Arc::new(
                SnapshotFileStore::open(path)
                    .await
                    .map_err(|e| LedgerError::Storage(e.to_string()))?,
            ),
            None => Arc::new(InMemoryKeyValueStore::new()),
        };

        // Purchases and cancellations reach disk on the next payout flush or
        // at shutdown; a crash before then loses them, never a payout
        tracing::info!(
            snapshot = config.data_path.is_some(),
            lock_timeout_ms = config.lock_timeout_ms,
            "Ledger opened"
        );

        Ok(Self::with_store_config(kv, clock, transfer, config.store_config()))
    }

    fn repository(&self) -> &LedgerRepository {
        self.store.repository()
    }

    fn now(&self) -> u64 {
        self.store.environment().clock.unix_now()
    }

    // ========================================================================
    // Mutating operations
    // ========================================================================

    /// Creates an event organized by `caller` and returns its id.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidEventParameters`]: empty title, zero price,
    ///   start not in the future, end not after start, or zero capacity
    /// - [`LedgerError::Overflow`]: event ids are exhausted
    /// - Runtime failures ([`LedgerError::Busy`], [`LedgerError::Storage`], ...)
    #[tracing::instrument(skip_all, fields(caller = %caller, title = %event.title))]
    pub async fn create_event(
        &self,
        caller: &Identity,
        event: NewEvent,
    ) -> Result<EventId, LedgerError> {
        let command = LedgerCommand::CreateEvent {
            organizer: caller.clone(),
            event,
        };
        let outcome = self
            .store
            .transact("create_event", &ScopeKey::Registry, command)
            .await?;

        tracing::info!(event_id = %outcome.event_id, "Event created");
        Ok(outcome.event_id)
    }

    /// Buys `quantity` tickets for `caller`, paying exactly `tendered`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`], [`LedgerError::InvalidQuantity`]
    /// - [`LedgerError::EventCanceled`], [`LedgerError::EventEnded`]
    /// - [`LedgerError::SoldOut`] with the tickets remaining
    /// - [`LedgerError::IncorrectPayment`] unless `tendered == unit_price * quantity`
    /// - Runtime failures
    #[tracing::instrument(skip_all, fields(caller = %caller, event_id = %event_id, quantity))]
    pub async fn buy_ticket(
        &self,
        caller: &Identity,
        event_id: EventId,
        quantity: u64,
        tendered: Amount,
    ) -> Result<(), LedgerError> {
        let command = LedgerCommand::BuyTicket {
            event_id,
            buyer: caller.clone(),
            quantity,
            tendered,
        };
        self.store
            .transact("buy_ticket", &ScopeKey::Holding(event_id, caller.clone()), command)
            .await?;

        tracing::info!(tendered = %tendered, "Tickets purchased");
        Ok(())
    }

    /// Cancels an event that has not started. Organizer only.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`], [`LedgerError::Unauthorized`]
    /// - [`LedgerError::AlreadyCanceled`], [`LedgerError::EventAlreadyStarted`]
    /// - Runtime failures
    #[tracing::instrument(skip_all, fields(caller = %caller, event_id = %event_id))]
    pub async fn cancel_event(&self, caller: &Identity, event_id: EventId) -> Result<(), LedgerError> {
        let command = LedgerCommand::CancelEvent {
            event_id,
            caller: caller.clone(),
        };
        self.store
            .transact("cancel_event", &ScopeKey::Event(event_id), command)
            .await?;

        tracing::info!("Event canceled");
        Ok(())
    }

    /// Refunds every ticket `caller` holds and returns the amount paid back.
    ///
    /// Allowed while more than 24 hours remain before the start, or at any
    /// time once the event is canceled.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`], [`LedgerError::NoTicketsHeld`]
    /// - [`LedgerError::RefundWindowClosed`]
    /// - [`LedgerError::TransferFailed`]: nothing changed, the holding is intact
    /// - [`LedgerError::TransferUnconfirmed`]: the holding stays refunded
    /// - Runtime failures
    #[tracing::instrument(skip_all, fields(caller = %caller, event_id = %event_id))]
    pub async fn request_refund(
        &self,
        caller: &Identity,
        event_id: EventId,
    ) -> Result<Amount, LedgerError> {
        let command = LedgerCommand::RequestRefund {
            event_id,
            caller: caller.clone(),
        };
        let Outcome { paid_out, .. } = self
            .store
            .transact("request_refund", &ScopeKey::Holding(event_id, caller.clone()), command)
            .await?;

        tracing::info!(amount = %paid_out, "Refund issued");
        Ok(paid_out)
    }

    /// Pays the proceeds of an ended event to its organizer, once.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`], [`LedgerError::Unauthorized`]
    /// - [`LedgerError::EventCanceled`], [`LedgerError::EventNotEnded`]
    /// - [`LedgerError::AlreadyWithdrawn`]
    /// - [`LedgerError::TransferFailed`]: nothing changed, withdrawal may be retried
    /// - [`LedgerError::TransferUnconfirmed`]: the event stays withdrawn
    /// - Runtime failures
    #[tracing::instrument(skip_all, fields(caller = %caller, event_id = %event_id))]
    pub async fn withdraw_funds(
        &self,
        caller: &Identity,
        event_id: EventId,
    ) -> Result<Amount, LedgerError> {
        let command = LedgerCommand::WithdrawFunds {
            event_id,
            caller: caller.clone(),
        };
        let Outcome { paid_out, .. } = self
            .store
            .transact("withdraw_funds", &ScopeKey::Event(event_id), command)
            .await?;

        tracing::info!(amount = %paid_out, "Funds withdrawn");
        Ok(paid_out)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns the event with `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id, or a runtime failure.
    pub async fn get_event(&self, event_id: EventId) -> Result<Event, LedgerError> {
        self.store
            .read(&ScopeKey::Event(event_id))
            .await?
            .event
            .ok_or(LedgerError::NotFound { event_id })
    }

    /// Tickets `holder` owns for `event_id`; zero if none.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id, or a runtime failure.
    pub async fn get_holding(&self, event_id: EventId, holder: &Identity) -> Result<u64, LedgerError> {
        let scope = self
            .store
            .read(&ScopeKey::Holding(event_id, holder.clone()))
            .await?;
        if scope.event.is_none() {
            return Err(LedgerError::NotFound { event_id });
        }
        Ok(scope.holding.map_or(0, |h| h.quantity))
    }

    /// Number of events ever created; ids run from 0 to this value
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] if the counter cannot be read.
    pub async fn event_count(&self) -> Result<u64, LedgerError> {
        Ok(self.repository().next_event_id().await.map_err(storage)?.value())
    }

    /// Every event in id order
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] if the scan fails.
    pub async fn list_events(&self) -> Result<Vec<Event>, LedgerError> {
        self.repository().list_events().await.map_err(storage)
    }

    /// Every event where `holder` owns at least one ticket
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] if the scan fails.
    pub async fn holdings_of(&self, holder: &Identity) -> Result<Vec<Holding>, LedgerError> {
        self.repository().holdings_of(holder).await.map_err(storage)
    }

    /// Lifecycle status of an event right now
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id, or a runtime failure.
    pub async fn event_status(&self, event_id: EventId) -> Result<EventStatus, LedgerError> {
        let event = self.get_event(event_id).await?;
        Ok(event.status(self.now()))
    }

    /// Value held in custody for an event
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id,
    /// [`LedgerError::Overflow`] if the balance is not representable, or a
    /// runtime failure.
    pub async fn escrowed_balance(&self, event_id: EventId) -> Result<Amount, LedgerError> {
        self.get_event(event_id)
            .await?
            .escrowed_balance()
            .ok_or(LedgerError::Overflow {
                context: "escrowed balance",
            })
    }

    // ========================================================================
    // Notifications, health, lifecycle
    // ========================================================================

    /// Subscribe to notifications published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Published<LedgerNotification>> {
        self.store.subscribe()
    }

    /// Retained notifications, oldest first
    #[must_use]
    pub fn notifications(&self) -> Vec<Published<LedgerNotification>> {
        self.store.notifications()
    }

    /// Health of the runtime and of the backing store
    pub async fn health(&self) -> HealthReport {
        let storage = match self.repository().next_event_id().await {
            Ok(next) => HealthCheck::healthy("storage").with_metadata("events", next.value().to_string()),
            Err(e) => HealthCheck::unhealthy("storage", e.to_string()),
        };
        HealthReport::new(vec![self.store.health(), storage])
    }

    /// Rejects new calls, waits for running ones, and flushes storage.
    ///
    /// Uses the configured shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ShutdownTimeout`] if calls are still running
    /// when the timeout expires, or [`LedgerError::Storage`] if the flush fails.
    pub async fn shutdown(&self) -> Result<(), LedgerError> {
        self.shutdown_with_timeout(self.shutdown_timeout).await
    }

    /// [`shutdown`](Self::shutdown) with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`shutdown`](Self::shutdown).
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), LedgerError> {
        self.store.shutdown(timeout).await?;
        Ok(())
    }
}

fn storage(error: ticket_escrow_core::kv_store::StorageError) -> LedgerError {
    LedgerError::Storage(error.to_string())
}
