//! Snapshot-file key-value store.
//!
//! Serves reads and writes from memory and persists the whole map to a
//! `bincode` snapshot on [`flush`](KeyValueStore::flush). The snapshot is
//! written to a sibling temp file first and renamed into place, so a crash
//! mid-flush leaves the previous snapshot intact.
//!
//! Writes between flushes live only in memory. The store runtime flushes
//! after every transaction that moved value out of custody; purchases,
//! creations and cancellations reach disk with the next such flush or at
//! shutdown, and a crash before then loses them.

use crate::memory::InMemoryKeyValueStore;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use ticket_escrow_core::kv_store::{KeyValueStore, StorageError, StoreFuture, WriteBatch};

/// Key-value store persisted as a single snapshot file
#[derive(Clone, Debug)]
pub struct SnapshotFileStore {
    path: PathBuf,
    inner: InMemoryKeyValueStore,
}

impl SnapshotFileStore {
    /// Opens the store, loading the snapshot at `path` if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file exists but cannot be read or decoded.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => bincode::deserialize::<BTreeMap<String, Vec<u8>>>(&bytes).map_err(
                |e| StorageError::Serialization {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                },
            )?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        tracing::info!(
            path = %path.display(),
            keys = entries.len(),
            "Opened snapshot store"
        );

        Ok(Self {
            path,
            inner: InMemoryKeyValueStore::from_entries(entries),
        })
    }

    /// Snapshot file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_snapshot(&self) -> Result<(), StorageError> {
        let entries = self.inner.snapshot();
        let bytes = bincode::serialize(&entries).map_err(|e| StorageError::Serialization {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let temp = self.path.with_extension("tmp");
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        tracing::debug!(
            path = %self.path.display(),
            keys = entries.len(),
            bytes = bytes.len(),
            "Snapshot written"
        );
        Ok(())
    }
}

impl KeyValueStore for SnapshotFileStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn apply(&self, batch: WriteBatch) -> StoreFuture<'_, ()> {
        self.inner.apply(batch)
    }

    fn scan_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<(String, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }

    fn flush(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.write_snapshot())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flush_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.snapshot");

        let store = SnapshotFileStore::open(&path).await.unwrap();
        let mut batch = WriteBatch::new();
        batch.put("event/0", vec![1, 2, 3]);
        store.apply(batch).await.unwrap();
        store.flush().await.unwrap();

        let reopened = SnapshotFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("event/0").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_unflushed_writes_are_not_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.snapshot");

        let store = SnapshotFileStore::open(&path).await.unwrap();
        let mut batch = WriteBatch::new();
        batch.put("event/0", vec![1]);
        store.apply(batch).await.unwrap();

        let reopened = SnapshotFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("event/0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.snapshot");
        tokio::fs::write(&path, [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff])
            .await
            .unwrap();

        let result = SnapshotFileStore::open(&path).await;
        assert!(matches!(result, Err(StorageError::Serialization { .. })));
    }
}
