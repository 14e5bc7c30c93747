//! Key-value store trait and related types.
//!
//! This module defines the storage abstraction the ledger sits on: a durable
//! map from string keys to opaque byte values with atomic multi-key writes.
//! Replication and write-ahead logging are the store's business; the ledger
//! only relies on the guarantees spelled out on [`KeyValueStore`].
//!
//! # Implementations
//!
//! - `InMemoryKeyValueStore` (in `ticket-escrow-runtime`): Fast, deterministic, volatile
//! - `SnapshotFileStore` (in `ticket-escrow-runtime`): In-memory map persisted to a snapshot file on flush
//!
//! # Encoding
//!
//! Records are encoded with `bincode` through [`encode`] and [`decode`]:
//! compact, fast, and shared by every Rust service touching the store.

use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by storage operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Underlying I/O failed
    #[error("I/O error: {0}")]
    Io(String),

    /// A record could not be encoded or decoded
    #[error("Serialization error for key '{key}': {reason}")]
    Serialization {
        /// Key of the offending record
        key: String,
        /// Decoder or encoder message
        reason: String,
    },

    /// The store was closed
    #[error("Store is closed")]
    Closed,
}

/// A single write inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or replace a value
    Put {
        /// Record key
        key: String,
        /// Encoded record
        value: Vec<u8>,
    },
    /// Remove a key if present
    Delete {
        /// Record key
        key: String,
    },
}

impl WriteOp {
    /// Key touched by this write
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Writes applied together or not at all
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Queues a put
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value,
        });
        self
    }

    /// Queues a delete
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    /// Number of queued writes
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued writes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    /// Consumes the batch
    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Durable key-value store abstraction.
///
/// # Guarantees
///
/// - `apply` is atomic: readers observe either none or all of a batch
/// - Once `flush` returns `Ok`, every applied batch survives a restart
/// - `scan_prefix` returns entries in ascending key order
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so the ledger can hold an `Arc<dyn KeyValueStore>`.
pub trait KeyValueStore: Send + Sync {
    /// Reads a single key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store cannot be read.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the batch was not applied. No write of the
    /// batch is visible in that case.
    fn apply(&self, batch: WriteBatch) -> StoreFuture<'_, ()>;

    /// Returns every entry whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store cannot be read.
    fn scan_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<(String, Vec<u8>)>>;

    /// Makes every applied batch durable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the data could not be persisted.
    fn flush(&self) -> StoreFuture<'_, ()>;
}

/// Encodes a record with `bincode`.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] if the value cannot be encoded.
pub fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Decodes a record with `bincode`.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] if the bytes are not a valid `T`.
pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
