//! In-memory storage.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::{DeleteStatus, Storage, StorageResult};

/// In-process key-value store using [`DashMap`].
///
/// Cloning is cheap and clones share the same map, which makes it easy to
/// inspect the raw contents of a cache from tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, Bytes>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks if a raw key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Writes raw bytes, bypassing the cache envelope.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.entries.insert(key.into(), value.into());
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn open(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        Ok(match self.entries.remove(key) {
            Some(_) => DeleteStatus::Deleted,
            None => DeleteStatus::Missing,
        })
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.entries.clear();
        Ok(())
    }

    fn label(&self) -> &str {
        "memory"
    }
}
