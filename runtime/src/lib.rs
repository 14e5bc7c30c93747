//! # Ticket Escrow Runtime
//!
//! Transactional runtime for the ticket escrow ledger.
//!
//! This crate provides the [`Store`](store::Store) that runs a reducer as a
//! sequence of isolated transactions over a key-value store, plus the
//! pieces it is built from.
//!
//! ## Core Components
//!
//! - **Store**: Locks a partition, loads state, reduces, commits, then runs effects
//! - **Partition locks**: Bounded-wait async mutexes, one per partition
//! - **Key-value stores**: In-memory and snapshot-file backends
//! - **Notification bus**: Ordered broadcast of committed facts
//!
//! ## Transaction Lifecycle
//!
//! ```text
//! acquire partition lock ─► load ─► reduce ─► commit ─► transfers ─► publish
//!                                     │                    │
//!                                     └─ Err: nothing      ├─ rejected: restore pre-image
//!                                        written           └─ timed out: keep commit
//! ```
//!
//! Everything from commit onward runs on a spawned task holding the
//! partition lock, so a caller that gives up waiting cannot leave a
//! committed state without its transfer.
//!
//! ## Example
//!
//! ```ignore
//! use ticket_escrow_runtime::{Store, StoreConfig};
//!
//! let store = Store::with_config(
//!     EventReducer,
//!     environment,
//!     Arc::new(LedgerRepository::new(kv)),
//!     Arc::new(LoggingTransfer::new()),
//!     StoreConfig::default(),
//! );
//!
//! let outcome = store.transact("buy_ticket", &key, command).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Notification bus with ordered delivery
pub mod bus;

/// Partition locks with bounded waits
pub mod locks;

/// In-memory key-value store
pub mod memory;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Snapshot-file key-value store
pub mod snapshot;

pub use bus::{NotificationBus, Published};
pub use memory::InMemoryKeyValueStore;
pub use snapshot::SnapshotFileStore;
pub use store::Store;

/// Error types for the Store runtime
pub mod error {
    use std::convert::Infallible;
    use thiserror::Error;
    use ticket_escrow_core::kv_store::StorageError;
    use ticket_escrow_core::transfer::TransferError;
    use ticket_escrow_core::{Amount, Identity};

    /// Errors that can occur during Store operations
    ///
    /// `E` is the reducer's own rejection type.
    #[derive(Error, Debug)]
    pub enum StoreError<E> {
        /// The reducer rejected the action; nothing was written
        #[error("{0}")]
        Rejected(E),

        /// The partition stayed locked for longer than the lock timeout
        ///
        /// Retryable.
        #[error("Partition {partition} is busy (waited {waited_ms}ms)")]
        Busy {
            /// Partition that stayed locked
            partition: String,
            /// How long the caller waited
            waited_ms: u64,
        },

        /// Store is shutting down and not accepting new transactions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Loading or committing state failed
        #[error("Storage failure: {0}")]
        Storage(#[from] StorageError),

        /// An outbound transfer failed after commit; the commit was rolled back
        #[error("Transfer of {amount} to {to} failed: {source}")]
        Transfer {
            /// Intended recipient
            to: Identity,
            /// Intended amount
            amount: Amount,
            /// Backend failure
            source: TransferError,
        },

        /// A transfer did not confirm in time; the commit was kept
        ///
        /// The recipient may or may not have been paid. The state stays as
        /// committed so the same payout is never issued twice.
        #[error("Transfer of {amount} to {to} was not confirmed; outcome unknown")]
        TransferUnconfirmed {
            /// Intended recipient
            to: Identity,
            /// Intended amount
            amount: Amount,
        },

        /// The task running the commit phase panicked or was cancelled
        #[error("Transaction task aborted: {0}")]
        Aborted(String),

        /// A transfer failed and restoring the pre-image failed too
        #[error("Rollback failed after transfer of {amount} to {to} failed: {storage}")]
        RollbackFailed {
            /// Intended recipient
            to: Identity,
            /// Intended amount
            amount: Amount,
            /// Why the rollback was not applied
            storage: StorageError,
        },

        /// Shutdown timed out waiting for transactions to finish
        #[error("Shutdown timed out with {0} transactions still running")]
        ShutdownTimeout(usize),
    }

    impl<E> StoreError<E> {
        /// Whether retrying the same call later may succeed
        #[must_use]
        pub const fn is_retryable(&self) -> bool {
            matches!(self, Self::Busy { .. })
        }

        /// Short label used for metrics
        #[must_use]
        pub const fn reason(&self) -> &'static str {
            match self {
                Self::Rejected(_) => "rejected",
                Self::Busy { .. } => "busy",
                Self::ShutdownInProgress | Self::ShutdownTimeout(_) => "shutdown",
                Self::Storage(_) => "storage",
                Self::Transfer { .. } => "transfer",
                Self::TransferUnconfirmed { .. } => "unconfirmed",
                Self::RollbackFailed { .. } => "rollback",
                Self::Aborted(_) => "aborted",
            }
        }
    }

    impl StoreError<Infallible> {
        /// Reinterprets an error raised after the reducer already accepted
        #[must_use]
        pub fn widen<E>(self) -> StoreError<E> {
            match self {
                Self::Rejected(never) => match never {},
                Self::Busy {
                    partition,
                    waited_ms,
                } => StoreError::Busy {
                    partition,
                    waited_ms,
                },
                Self::ShutdownInProgress => StoreError::ShutdownInProgress,
                Self::Storage(storage) => StoreError::Storage(storage),
                Self::Transfer { to, amount, source } => StoreError::Transfer { to, amount, source },
                Self::TransferUnconfirmed { to, amount } => {
                    StoreError::TransferUnconfirmed { to, amount }
                }
                Self::Aborted(reason) => StoreError::Aborted(reason),
                Self::RollbackFailed {
                    to,
                    amount,
                    storage,
                } => StoreError::RollbackFailed {
                    to,
                    amount,
                    storage,
                },
                Self::ShutdownTimeout(pending) => StoreError::ShutdownTimeout(pending),
            }
        }
    }
}

pub use error::StoreError;

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but experiencing issues (e.g., no subscribers keeping up)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Metadata such as counters and capacities
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Look up a metadata value
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall system status.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall system status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Check if overall system is degraded
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.status.is_degraded()
    }

    /// Check if overall system is unhealthy
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        self.status.is_unhealthy()
    }

    /// Find the check for `component`
    #[must_use]
    pub fn check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }
}

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ticket_escrow_runtime::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_lock_timeout(Duration::from_millis(250))
///     .with_notification_capacity(64);
///
/// assert_eq!(config.notification_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Longest wait for a partition lock before failing with `Busy`
    pub lock_timeout: Duration,
    /// Longest wait for a single outbound transfer
    pub transfer_timeout: Duration,
    /// Default timeout for graceful shutdown
    pub default_shutdown_timeout: Duration,
    /// Notification history and broadcast buffer size
    pub notification_capacity: usize,
}

impl StoreConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(
        lock_timeout: Duration,
        transfer_timeout: Duration,
        default_shutdown_timeout: Duration,
        notification_capacity: usize,
    ) -> Self {
        Self {
            lock_timeout,
            transfer_timeout,
            default_shutdown_timeout,
            notification_capacity,
        }
    }

    /// Set the partition lock timeout
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the transfer timeout
    #[must_use]
    pub const fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }

    /// Set the notification capacity
    #[must_use]
    pub const fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(10),
            default_shutdown_timeout: Duration::from_secs(30),
            notification_capacity: 1024,
        }
    }
}

/// Decrements the in-flight counter when a transaction ends, however it ends
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl AtomicCounterGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        crate::metrics::TransactionMetrics::record_in_flight(count);
        Self(Arc::clone(counter))
    }
}

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        let previous = self.0.fetch_sub(1, Ordering::SeqCst);
        crate::metrics::TransactionMetrics::record_in_flight(previous.saturating_sub(1));
    }
}

/// Store runtime: transactional execution of a reducer.
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicCounterGuard, AtomicUsize, Duration, HealthCheck, Ordering,
        StoreConfig, StoreError,
    };
    use crate::bus::{NotificationBus, Published};
    use crate::locks::PartitionLocks;
    use crate::metrics::{StorageMetrics, TransactionMetrics, TransferMetrics};
    use std::convert::Infallible;
    use std::time::Instant;
    use ticket_escrow_core::effect::Effect;
    use ticket_escrow_core::reducer::{Effects, Reducer};
    use ticket_escrow_core::repository::Repository;
    use ticket_escrow_core::transfer::{Payout, TransferError, ValueTransfer};
    use tokio::sync::broadcast;
    use tracing::Instrument;

    /// The Store - runtime coordinator for a reducer
    ///
    /// Every call to [`transact`](Store::transact) runs as one isolated
    /// transaction:
    ///
    /// 1. Acquire the partition lock (bounded wait)
    /// 2. Load state through the repository
    /// 3. Reduce; a rejection writes nothing
    /// 4. Commit the new state as one batch
    /// 5. Run transfers; a definite failure restores the pre-image, an
    ///    unconfirmed one keeps the commit
    /// 6. Make the commit durable if value moved, then publish notifications
    ///
    /// Steps 4 to 6 run on a spawned task that owns the partition lock.
    /// Dropping the caller's future does not interrupt them, and a second
    /// transaction on the same partition never sees a committed state whose
    /// transfer is still in flight.
    ///
    /// # Type Parameters
    ///
    /// - `R`: Reducer implementation
    /// - `P`: Repository supplying the reducer's state
    pub struct Store<R, P>
    where
        R: Reducer<State = P::State>,
        P: Repository,
    {
        reducer: R,
        environment: R::Environment,
        repository: Arc<P>,
        transfer: Arc<dyn ValueTransfer>,
        locks: PartitionLocks,
        bus: Arc<NotificationBus<R::Notification>>,
        config: StoreConfig,
        shutdown: AtomicBool,
        in_flight: Arc<AtomicUsize>,
    }

    impl<R, P> Store<R, P>
    where
        R: Reducer<State = P::State> + Send + Sync,
        R::Action: Send,
        R::Environment: Send + Sync,
        R::Output: Send,
        R::Error: std::fmt::Display + Send,
        R::Notification: Clone + Send + Sync + 'static,
        P: Repository,
    {
        /// Create a new store with default configuration
        #[must_use]
        pub fn new(
            reducer: R,
            environment: R::Environment,
            repository: Arc<P>,
            transfer: Arc<dyn ValueTransfer>,
        ) -> Self {
            Self::with_config(
                reducer,
                environment,
                repository,
                transfer,
                StoreConfig::default(),
            )
        }

        /// Create a new store with custom configuration
        #[must_use]
        pub fn with_config(
            reducer: R,
            environment: R::Environment,
            repository: Arc<P>,
            transfer: Arc<dyn ValueTransfer>,
            config: StoreConfig,
        ) -> Self {
            Self {
                reducer,
                environment,
                repository,
                transfer,
                locks: PartitionLocks::new(),
                bus: Arc::new(NotificationBus::new(config.notification_capacity)),
                config,
                shutdown: AtomicBool::new(false),
                in_flight: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Runs `action` as one transaction on the state behind `key`.
        ///
        /// `operation` labels logs and metrics.
        ///
        /// # Errors
        ///
        /// - [`StoreError::ShutdownInProgress`]: shutdown has begun
        /// - [`StoreError::Busy`]: the partition stayed locked past the lock timeout
        /// - [`StoreError::Rejected`]: the reducer refused the action; nothing was written
        /// - [`StoreError::Storage`]: loading or committing failed; nothing was written
        /// - [`StoreError::Transfer`]: a transfer failed; the commit was rolled back
        /// - [`StoreError::TransferUnconfirmed`]: a transfer timed out; the commit was kept
        /// - [`StoreError::RollbackFailed`]: a transfer failed and the rollback did too
        /// - [`StoreError::Aborted`]: the commit task panicked
        #[tracing::instrument(skip(self, key, action), name = "store_transact", fields(partition = tracing::field::Empty))]
        pub async fn transact(
            &self,
            operation: &'static str,
            key: &P::Key,
            action: R::Action,
        ) -> Result<R::Output, StoreError<R::Error>> {
            let in_flight = AtomicCounterGuard::enter(&self.in_flight);
            if self.shutdown.load(Ordering::SeqCst) {
                TransactionMetrics::record_rejection(operation, "shutdown");
                return Err(StoreError::ShutdownInProgress);
            }

            let partition = self.repository.partition(key);
            tracing::Span::current().record("partition", partition.as_str());

            let guard = self
                .locks
                .acquire(&partition, self.config.lock_timeout)
                .await
                .map_err(|timeout| {
                    TransactionMetrics::record_rejection(operation, "busy");
                    tracing::warn!(
                        waited_ms = duration_ms(timeout.waited),
                        "Partition lock not acquired in time"
                    );
                    StoreError::Busy {
                        partition: timeout.partition,
                        waited_ms: duration_ms(timeout.waited),
                    }
                })?;
            TransactionMetrics::record_lock_wait(guard.waited());
            tracing::debug!(waited_ms = duration_ms(guard.waited()), "Partition lock acquired");

            let started = Instant::now();
            let mut state = self.load(key).await?;
            let pre_image = state.clone();

            let reduced = {
                let _span = tracing::debug_span!("reduce", operation).entered();
                self.reducer.reduce(&mut state, action, &self.environment)
            };
            let reduced = match reduced {
                Ok(reduced) => reduced,
                Err(rejection) => {
                    TransactionMetrics::record_rejection(operation, "rejected");
                    tracing::debug!(reason = %rejection, "Action rejected");
                    return Err(StoreError::Rejected(rejection));
                }
            };

            let commit = Commit {
                operation,
                repository: Arc::clone(&self.repository),
                transfer: Arc::clone(&self.transfer),
                bus: Arc::clone(&self.bus),
                transfer_timeout: self.config.transfer_timeout,
                key: key.clone(),
                state,
                pre_image,
            };
            let effects = reduced.effects;

            // No await between reduce and spawn: once reduced, the commit runs to the end
            let task = tokio::spawn(
                async move {
                    let result = commit.run(effects).await;
                    if result.is_ok() {
                        TransactionMetrics::record_commit(operation, started.elapsed());
                    }
                    drop(guard);
                    drop(in_flight);
                    result
                }
                .instrument(tracing::Span::current()),
            );

            match task.await {
                Ok(Ok(())) => Ok(reduced.output),
                Ok(Err(failure)) => Err(failure.widen()),
                Err(join) => {
                    tracing::error!(error = %join, "Commit task aborted");
                    Err(StoreError::Aborted(join.to_string()))
                }
            }
        }

        /// Loads the state behind `key` under its partition lock.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Busy`] if the partition stays locked past the
        /// lock timeout, or [`StoreError::Storage`] if loading fails.
        pub async fn read(&self, key: &P::Key) -> Result<P::State, StoreError<R::Error>> {
            let partition = self.repository.partition(key);
            let _guard = self
                .locks
                .acquire(&partition, self.config.lock_timeout)
                .await
                .map_err(|timeout| StoreError::Busy {
                    partition: timeout.partition,
                    waited_ms: duration_ms(timeout.waited),
                })?;
            self.load(key).await
        }

        /// Subscribe to notifications published from now on
        #[must_use]
        pub fn subscribe(&self) -> broadcast::Receiver<Published<R::Notification>> {
            self.bus.subscribe()
        }

        /// Retained notifications, oldest first
        #[must_use]
        pub fn notifications(&self) -> Vec<Published<R::Notification>> {
            self.bus.history()
        }

        /// Repository backing this store
        #[must_use]
        pub fn repository(&self) -> &Arc<P> {
            &self.repository
        }

        /// Environment handed to the reducer
        #[must_use]
        pub const fn environment(&self) -> &R::Environment {
            &self.environment
        }

        /// Active configuration
        #[must_use]
        pub const fn config(&self) -> &StoreConfig {
            &self.config
        }

        /// Whether shutdown has begun
        #[must_use]
        pub fn is_shutting_down(&self) -> bool {
            self.shutdown.load(Ordering::SeqCst)
        }

        /// Health check for the store
        ///
        /// Unhealthy once shutdown has begun. Degraded while notifications
        /// have been published but nobody is subscribed and the history has
        /// started dropping entries.
        #[must_use]
        pub fn health(&self) -> HealthCheck {
            let in_flight = self.in_flight.load(Ordering::SeqCst);
            let published = self.bus.published_count();
            let subscribers = self.bus.subscriber_count();
            let capacity = self.bus.capacity();
            let dropped = published.saturating_sub(u64::try_from(capacity).unwrap_or(u64::MAX));

            let check = if self.is_shutting_down() {
                HealthCheck::unhealthy("store", "Store is shutting down")
            } else if subscribers == 0 && dropped > 0 {
                HealthCheck::degraded(
                    "store",
                    format!("{dropped} notifications dropped from history with no subscribers"),
                )
            } else {
                HealthCheck::healthy("store")
            };

            check
                .with_metadata("in_flight", in_flight.to_string())
                .with_metadata("partitions", self.locks.len().to_string())
                .with_metadata("notifications_published", published.to_string())
                .with_metadata("notification_subscribers", subscribers.to_string())
                .with_metadata("notification_capacity", capacity.to_string())
        }

        /// Makes every committed transaction durable.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Storage`] if the repository cannot flush.
        pub async fn flush(&self) -> Result<(), StoreError<R::Error>> {
            self.repository.flush().await.map_err(|e| {
                StorageMetrics::record_error();
                tracing::error!(error = %e, "Flush failed");
                StoreError::Storage(e)
            })
        }

        /// Initiate graceful shutdown of the store
        ///
        /// This method:
        /// 1. Sets the shutdown flag (rejecting new transactions)
        /// 2. Waits for in-flight transactions to finish (with timeout)
        /// 3. Flushes the repository
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if transactions are still
        /// running when `timeout` expires, or [`StoreError::Storage`] if the
        /// final flush fails.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError<R::Error>> {
            tracing::info!("Initiating graceful shutdown");
            self.shutdown.store(true, Ordering::SeqCst);

            let start = Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.in_flight.load(Ordering::SeqCst);
                if pending == 0 {
                    break;
                }

                if start.elapsed() >= timeout {
                    tracing::error!(
                        in_flight = pending,
                        "Shutdown timeout: {} transactions still running",
                        pending
                    );
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tracing::debug!(
                    in_flight = pending,
                    elapsed_ms = duration_ms(start.elapsed()),
                    "Waiting for transactions to finish"
                );
                tokio::time::sleep(poll_interval).await;
            }

            self.flush().await?;
            tracing::info!("All transactions finished, store flushed");
            Ok(())
        }

        async fn load(&self, key: &P::Key) -> Result<P::State, StoreError<R::Error>> {
            self.repository.load(key).await.map_err(|e| {
                StorageMetrics::record_error();
                tracing::error!(error = %e, "Failed to load state");
                StoreError::Storage(e)
            })
        }
    }

    // ========================================================================
    // Commit phase
    // ========================================================================

    /// Everything the commit phase needs, owned so it can outlive the caller
    struct Commit<P: Repository, N> {
        operation: &'static str,
        repository: Arc<P>,
        transfer: Arc<dyn ValueTransfer>,
        bus: Arc<NotificationBus<N>>,
        transfer_timeout: Duration,
        key: P::Key,
        state: P::State,
        pre_image: P::State,
    }

    impl<P, N> Commit<P, N>
    where
        P: Repository,
        N: Clone + Send + Sync + 'static,
    {
        /// Commits the reduced state, runs its effects and publishes.
        async fn run(self, effects: Effects<N>) -> Result<(), StoreError<Infallible>> {
            self.save(&self.state).await?;
            tracing::debug!("State committed");

            let mut notifications = Vec::new();
            let mut value_moved = false;
            for effect in effects {
                match effect {
                    Effect::None => {}
                    Effect::Transfer(payout) => {
                        match self.execute_transfer(payout.clone()).await {
                            Ok(()) => value_moved = true,
                            Err(source) if value_moved || source.is_ambiguous() => {
                                return Err(self.keep_unconfirmed(payout, &source).await);
                            }
                            Err(source) => return Err(self.roll_back(payout, source).await),
                        }
                    }
                    Effect::Publish(notification) => notifications.push(notification),
                }
            }

            if value_moved {
                self.make_durable().await;
            }

            for notification in notifications {
                self.bus.publish(notification);
            }
            Ok(())
        }

        async fn save(&self, state: &P::State) -> Result<(), StoreError<Infallible>> {
            match self.repository.save(&self.key, state).await {
                Ok(()) => {
                    StorageMetrics::record_write();
                    Ok(())
                }
                Err(e) => {
                    StorageMetrics::record_error();
                    tracing::error!(error = %e, "Failed to commit state");
                    Err(StoreError::Storage(e))
                }
            }
        }

        async fn execute_transfer(&self, payout: Payout) -> Result<(), TransferError> {
            let started = Instant::now();
            let result =
                match tokio::time::timeout(self.transfer_timeout, self.transfer.transfer(payout)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransferError::Timeout),
                };

            match result {
                Ok(receipt) => {
                    TransferMetrics::record_success(started.elapsed());
                    tracing::debug!(
                        reference = %receipt.reference,
                        to = %receipt.payout.to,
                        amount = %receipt.payout.amount,
                        "Transfer completed"
                    );
                    Ok(())
                }
                Err(e) => {
                    TransferMetrics::record_failure();
                    Err(e)
                }
            }
        }

        /// Flushes after value left custody, so a restart cannot forget it.
        ///
        /// A failed flush is logged; the commit itself already succeeded.
        async fn make_durable(&self) {
            if let Err(e) = self.repository.flush().await {
                StorageMetrics::record_error();
                tracing::error!(error = %e, "Flush after transfer failed");
            }
        }

        /// Keeps the commit when value may already have moved.
        async fn keep_unconfirmed(&self, payout: Payout, source: &TransferError) -> StoreError<Infallible> {
            tracing::error!(
                to = %payout.to,
                amount = %payout.amount,
                error = %source,
                "Transfer outcome unknown, keeping commit"
            );
            TransactionMetrics::record_rejection(self.operation, "unconfirmed");
            self.make_durable().await;
            StoreError::TransferUnconfirmed {
                to: payout.to,
                amount: payout.amount,
            }
        }

        /// Restores the pre-image after a failed transfer and builds the error to return.
        async fn roll_back(&self, payout: Payout, source: TransferError) -> StoreError<Infallible> {
            tracing::warn!(
                to = %payout.to,
                amount = %payout.amount,
                error = %source,
                "Transfer failed, rolling back"
            );
            TransactionMetrics::record_rejection(self.operation, "transfer");

            match self.repository.save(&self.key, &self.pre_image).await {
                Ok(()) => {
                    TransferMetrics::record_rollback();
                    StoreError::Transfer {
                        to: payout.to,
                        amount: payout.amount,
                        source,
                    }
                }
                Err(storage) => {
                    StorageMetrics::record_error();
                    tracing::error!(error = %storage, "Rollback failed");
                    StoreError::RollbackFailed {
                        to: payout.to,
                        amount: payout.amount,
                        storage,
                    }
                }
            }
        }
    }

    fn duration_ms(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }
}
