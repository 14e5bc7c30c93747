//! # Ticket Escrow Testing
//!
//! Testing utilities and helpers for the ticket escrow ledger.
//!
//! This crate provides:
//! - Mock implementations of Environment traits (clocks, value transfer)
//! - A Given-When-Then harness for reducers
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use ticket_escrow_testing::{ManualClock, RecordingTransfer};
//!
//! #[tokio::test]
//! async fn test_refund_pays_holder() {
//!     let clock = Arc::new(ManualClock::at_unix(1_000));
//!     let transfer = Arc::new(RecordingTransfer::new());
//!     let ledger = Ledger::in_memory(config, clock.clone(), transfer.clone()).await?;
//!
//!     // ... create, buy, refund ...
//!
//!     assert_eq!(transfer.total_to(&buyer), Amount::from_units(2));
//! }
//! ```

use chrono::{DateTime, Utc};
use ticket_escrow_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;
    use ticket_escrow_core::transfer::{
        Payout, TransferError, TransferFuture, TransferReceipt, ValueTransfer,
    };
    use ticket_escrow_core::{Amount, Identity};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_escrow_testing::mocks::FixedClock;
    /// use ticket_escrow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Unix timestamp of 2025-01-01 00:00:00 UTC
    pub const TEST_EPOCH: i64 = 1_735_689_600;

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(TEST_EPOCH, 0).unwrap_or_default())
    }

    /// Clock that only moves when told to
    ///
    /// Shared between the code under test and the test body, so a test can
    /// walk an event through its lifecycle without sleeping.
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_escrow_testing::mocks::ManualClock;
    /// use ticket_escrow_core::environment::Clock;
    ///
    /// let clock = ManualClock::at_unix(1_000);
    /// clock.advance_secs(60);
    /// assert_eq!(clock.unix_now(), 1_060);
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        seconds: AtomicI64,
    }

    impl ManualClock {
        /// Create a clock reading `time`, truncated to whole seconds
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                seconds: AtomicI64::new(time.timestamp()),
            }
        }

        /// Create a clock reading `seconds` since the Unix epoch
        #[must_use]
        pub fn at_unix(seconds: u64) -> Self {
            Self {
                seconds: AtomicI64::new(i64::try_from(seconds).unwrap_or(i64::MAX)),
            }
        }

        /// Set the clock to `seconds` since the Unix epoch
        pub fn set_unix(&self, seconds: u64) {
            self.seconds.store(
                i64::try_from(seconds).unwrap_or(i64::MAX),
                Ordering::SeqCst,
            );
        }

        /// Move the clock by `delta` seconds (negative moves it back)
        pub fn advance_secs(&self, delta: i64) {
            let _ = self
                .seconds
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(current.saturating_add(delta))
                });
        }

        /// Move the clock forward by `duration`, truncated to whole seconds
        pub fn advance(&self, duration: Duration) {
            self.advance_secs(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX));
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self {
                seconds: AtomicI64::new(TEST_EPOCH),
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(self.seconds.load(Ordering::SeqCst), 0).unwrap_or_default()
        }
    }

    #[derive(Debug, Default)]
    struct TransferLog {
        payouts: Vec<Payout>,
        fail_next: usize,
        fail_always: bool,
    }

    /// Value transfer that records every payout
    ///
    /// Failures can be injected to exercise rollback, and a delay can be
    /// added to keep a transaction's partition locked for a while.
    #[derive(Debug, Default)]
    pub struct RecordingTransfer {
        log: Mutex<TransferLog>,
        delay: Option<Duration>,
        ack_delay: Option<Duration>,
        next_reference: AtomicU64,
    }

    impl RecordingTransfer {
        /// Create a transfer backend that always succeeds
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Wait `delay` before answering each transfer
        #[must_use]
        pub const fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Record each payout at once but wait `delay` before acknowledging it
        ///
        /// Models a backend that pays and then answers slowly.
        #[must_use]
        pub const fn with_ack_delay(mut self, delay: Duration) -> Self {
            self.ack_delay = Some(delay);
            self
        }

        /// Reject the next `count` transfers
        pub fn fail_next(&self, count: usize) {
            self.log().fail_next = count;
        }

        /// Reject every transfer until switched off
        pub fn fail_always(&self, fail: bool) {
            self.log().fail_always = fail;
        }

        /// Every successful payout, in order
        #[must_use]
        pub fn payouts(&self) -> Vec<Payout> {
            self.log().payouts.clone()
        }

        /// Sum of successful payouts to `to`
        #[must_use]
        pub fn total_to(&self, to: &Identity) -> Amount {
            self.log()
                .payouts
                .iter()
                .filter(|p| &p.to == to)
                .fold(Amount::ZERO, |sum, p| {
                    sum.checked_add(p.amount).unwrap_or(sum)
                })
        }

        /// Sum of every successful payout
        #[must_use]
        pub fn total(&self) -> Amount {
            self.log().payouts.iter().fold(Amount::ZERO, |sum, p| {
                sum.checked_add(p.amount).unwrap_or(sum)
            })
        }

        fn log(&self) -> std::sync::MutexGuard<'_, TransferLog> {
            self.log.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl ValueTransfer for RecordingTransfer {
        fn transfer(&self, payout: Payout) -> TransferFuture<'_> {
            Box::pin(async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }

                let receipt = {
                    let mut log = self.log();
                    if log.fail_always {
                        return Err(TransferError::Unavailable("injected outage".to_string()));
                    }
                    if log.fail_next > 0 {
                        log.fail_next -= 1;
                        return Err(TransferError::Rejected {
                            reason: "injected failure".to_string(),
                        });
                    }

                    let reference = format!(
                        "test-{}",
                        self.next_reference.fetch_add(1, Ordering::SeqCst)
                    );
                    tracing::trace!(%reference, to = %payout.to, amount = %payout.amount, "Recorded payout");
                    log.payouts.push(payout.clone());
                    TransferReceipt { reference, payout }
                };

                if let Some(delay) = self.ack_delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(receipt)
            })
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use ticket_escrow_core::Identity;

    /// One of a small pool of identities, so generated callers collide often
    pub fn identity() -> impl Strategy<Value = Identity> {
        prop::sample::select(vec!["alice", "bob", "carol", "dave"]).prop_map(Identity::from)
    }

    /// A ticket quantity between 1 and `max`
    pub fn quantity(max: u64) -> impl Strategy<Value = u64> {
        1..=max.max(1)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, RecordingTransfer, test_clock};
