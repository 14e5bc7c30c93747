//! Transaction-scoped record loading and saving.
//!
//! A repository maps a transaction key to the exact set of records the
//! transaction may touch, loads them as one state value, and writes them
//! back as one atomic batch. It also names the partition the key belongs
//! to; the runtime serializes transactions that share a partition.

use crate::kv_store::StoreFuture;

/// Loads and saves the state a single transaction operates on.
pub trait Repository: Send + Sync + 'static {
    /// Identifies the records of one transaction
    type Key: Clone + Send + Sync + 'static;

    /// Records loaded for one transaction
    type State: Clone + Send + Sync + 'static;

    /// Partition the key belongs to
    ///
    /// Transactions with equal partitions never run concurrently.
    fn partition(&self, key: &Self::Key) -> String;

    /// Loads the records for `key`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if any record cannot be read or decoded.
    fn load<'a>(&'a self, key: &'a Self::Key) -> StoreFuture<'a, Self::State>;

    /// Writes `state` back in a single atomic batch.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the batch was not applied.
    fn save<'a>(&'a self, key: &'a Self::Key, state: &'a Self::State) -> StoreFuture<'a, ()>;

    /// Makes every saved state durable.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying store fails to flush.
    fn flush(&self) -> StoreFuture<'_, ()>;
}
