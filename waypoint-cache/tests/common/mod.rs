//! Storage wrappers that fail or pause on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use waypoint_cache::{DeleteStatus, MemoryStorage, Storage, StorageError, StorageResult};

/// Wraps a [`MemoryStorage`] and injects errors.
#[derive(Clone, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_reads: bool,
    fail_next_open: Arc<AtomicBool>,
}

impl FailingStorage {
    /// Every `get` returns an error. Writes succeed.
    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    /// The first `open` fails, later ones succeed.
    pub fn failing_open_once() -> Self {
        Self {
            fail_next_open: Arc::new(AtomicBool::new(true)),
            ..Self::default()
        }
    }
}

fn injected() -> StorageError {
    StorageError::Io(std::io::Error::other("injected failure"))
}

#[async_trait]
impl Storage for FailingStorage {
    async fn open(&self) -> StorageResult<()> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.open().await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        if self.fail_reads {
            return Err(injected());
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys().await
    }

    fn label(&self) -> &str {
        "failing"
    }
}

/// Wraps a [`MemoryStorage`] and can hold one `get` after it has read.
#[derive(Clone, Default)]
pub struct GatedStorage {
    inner: MemoryStorage,
    armed: Arc<AtomicBool>,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedStorage {
    /// The next `get` pauses after reading until [`release`](Self::release).
    pub fn hold_next_get(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Resolves once the held `get` has read its value.
    pub async fn held(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Storage for GatedStorage {
    async fn open(&self) -> StorageResult<()> {
        self.inner.open().await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let value = self.inner.get(key).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys().await
    }

    fn label(&self) -> &str {
        "gated"
    }
}
