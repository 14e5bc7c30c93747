//! In-memory key-value store.
//!
//! Fast and deterministic; everything is lost when the process exits.
//! [`SnapshotFileStore`](crate::snapshot::SnapshotFileStore) layers
//! durability on top of it.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use ticket_escrow_core::kv_store::{KeyValueStore, StoreFuture, WriteBatch, WriteOp};

/// `BTreeMap`-backed store with atomic batches
///
/// # Example
///
/// ```
/// use ticket_escrow_core::kv_store::{KeyValueStore, WriteBatch};
/// use ticket_escrow_runtime::memory::InMemoryKeyValueStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryKeyValueStore::new();
/// let mut batch = WriteBatch::new();
/// batch.put("event/1", b"record".to_vec());
/// store.apply(batch).await?;
///
/// assert!(store.get("event/1").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryKeyValueStore {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryKeyValueStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            data: Arc::new(RwLock::new(entries)),
        }
    }

    /// Copy of every entry
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply_now(&self, batch: WriteBatch) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    data.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            Ok(self
                .data
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned())
        })
    }

    fn apply(&self, batch: WriteBatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.apply_now(batch);
            Ok(())
        })
    }

    fn scan_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<(String, Vec<u8>)>> {
        Box::pin(async move {
            let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
            Ok(data
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect())
        })
    }

    fn flush(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
