use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::StorageResult;

/// Status of a delete operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record deleted.
    Deleted,
    /// Record was already missing.
    Missing,
}

/// Persistent key-value byte store backing a [`ResponseCache`](crate::ResponseCache).
///
/// Implementations only move opaque bytes around. Expiry, eviction and
/// serialization are handled by the cache itself, so a store needs no notion
/// of time.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Prepares the store for use (opens files, runs migrations).
    ///
    /// Called lazily before the first cache operation. Must be idempotent.
    async fn open(&self) -> StorageResult<()>;

    /// Reads the raw bytes stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Inserts or replaces the bytes stored under `key`.
    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus>;

    /// Enumerates every stored key, in no particular order.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Removes every entry.
    async fn clear(&self) -> StorageResult<()> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    /// Name of this store, used in log fields and metric labels.
    fn label(&self) -> &str {
        "storage"
    }
}

#[async_trait]
impl Storage for Box<dyn Storage> {
    async fn open(&self) -> StorageResult<()> {
        (**self).open().await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys().await
    }

    async fn clear(&self) -> StorageResult<()> {
        (**self).clear().await
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}

#[async_trait]
impl Storage for Arc<dyn Storage> {
    async fn open(&self) -> StorageResult<()> {
        (**self).open().await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys().await
    }

    async fn clear(&self) -> StorageResult<()> {
        (**self).clear().await
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}
