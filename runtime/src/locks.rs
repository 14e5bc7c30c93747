//! Partition locks with bounded waits.
//!
//! Every transaction holds the lock of its partition from the moment it
//! loads state until its last effect has run. Transactions in different
//! partitions never contend. A caller that cannot get the lock within the
//! configured wait gets [`LockTimeout`] instead of blocking forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

/// The lock for a partition was not acquired in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeout {
    /// Partition that stayed locked
    pub partition: String,
    /// How long the caller waited
    pub waited: Duration,
}

/// Exclusive access to one partition, released on drop
#[derive(Debug)]
pub struct PartitionGuard {
    partition: String,
    waited: Duration,
    _guard: OwnedMutexGuard<()>,
}

impl PartitionGuard {
    /// Partition held by this guard
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Time spent waiting for the lock
    #[must_use]
    pub const fn waited(&self) -> Duration {
        self.waited
    }
}

/// Registry of per-partition async mutexes
#[derive(Debug, Default)]
pub struct PartitionLocks {
    partitions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PartitionLocks {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `partition`, waiting at most `timeout`.
    ///
    /// Waiters are served in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the lock is still held after `timeout`.
    pub async fn acquire(
        &self,
        partition: &str,
        timeout: Duration,
    ) -> Result<PartitionGuard, LockTimeout> {
        let mutex = {
            let mut partitions = self
                .partitions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(partitions.entry(partition.to_string()).or_default())
        };

        let start = Instant::now();
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(PartitionGuard {
                partition: partition.to_string(),
                waited: start.elapsed(),
                _guard: guard,
            }),
            Err(_) => Err(LockTimeout {
                partition: partition.to_string(),
                waited: start.elapsed(),
            }),
        }
    }

    /// Number of partitions ever locked
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no partition was ever locked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
