//! Time-boxed, size-bounded response cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::envelope::EnvelopeHeader;
use crate::{
    CacheConfig, CacheEnvelope, CacheKey, Clock, MemoryStorage, Storage, StorageError,
    SystemClock, metrics,
};

/// Point-in-time counters of a [`ResponseCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently in storage, or `None` if storage could not be listed.
    pub entries: Option<usize>,
    /// Lookups that returned a payload.
    pub hits: u64,
    /// Lookups that returned nothing, including expired and corrupt entries.
    pub misses: u64,
    /// Successful writes.
    pub writes: u64,
    /// Entries removed to respect `max_entries`.
    pub evictions: u64,
    /// Storage errors absorbed by the cache.
    pub errors: u64,
    /// Whether the storage has been opened.
    pub initialized: bool,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

/// Read-through response cache keyed by request `(path, query)`.
///
/// # Semantics
///
/// - [`get`](Self::get) returns a payload only if `now - stored_at <= ttl`.
///   Expired entries are deleted on the spot.
/// - [`put`](Self::put) upserts with `stored_at = now`, then evicts the oldest
///   entries by `stored_at` until at most `max_entries` remain. Eviction is by
///   insertion time: reads never refresh an entry's position.
/// - Entries that fail to decode are treated as absent and removed.
/// - Storage errors are logged and degrade to a miss or no-op.
///
/// The storage is opened lazily on first use. A failed open is retried by the
/// next operation.
pub struct ResponseCache<S = MemoryStorage> {
    storage: S,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    initialized: OnceCell<()>,
    write_lock: Mutex<()>,
    counters: Counters,
}

impl<S> std::fmt::Debug for ResponseCache<S>
where
    S: Storage,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("storage", &self.storage.label())
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("initialized", &self.initialized.initialized())
            .finish()
    }
}

impl ResponseCache<MemoryStorage> {
    /// Creates a builder with in-memory storage and default bounds.
    pub fn builder() -> ResponseCacheBuilder<MemoryStorage> {
        ResponseCacheBuilder::new()
    }
}

impl<S> ResponseCache<S>
where
    S: Storage,
{
    /// Creates a cache over `storage` with the system clock.
    pub fn new(storage: S, config: CacheConfig) -> Self {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    /// Creates a cache over `storage` driven by `clock`.
    pub fn with_clock(storage: S, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            config,
            clock,
            initialized: OnceCell::new(),
            write_lock: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Active bounds.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether the storage has been opened.
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Opens the storage if needed. Returns `false` if it cannot be opened.
    pub async fn initialize(&self) -> bool {
        let result = self
            .initialized
            .get_or_try_init(|| async {
                self.storage.open().await?;
                debug!(storage = self.storage.label(), "cache storage opened");
                if self.config.sweep_on_init {
                    let _guard = self.write_lock.lock().await;
                    self.sweep_expired().await;
                }
                Ok::<(), StorageError>(())
            })
            .await;

        match result {
            Ok(_) => true,
            Err(error) => {
                self.storage_error("open", &error);
                false
            }
        }
    }

    /// Looks up the payload cached for `path` and `query`.
    pub async fn get<T, K, V>(&self, path: &str, query: &[(K, V)]) -> Option<T>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.get_by_key(&CacheKey::new(path, query)).await
    }

    /// Looks up the payload cached under `key`.
    pub async fn get_by_key<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: DeserializeOwned,
    {
        if !self.initialize().await {
            self.record_miss();
            return None;
        }

        let raw = match self.storage.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.record_miss();
                return None;
            }
            Err(error) => {
                self.storage_error("get", &error);
                self.record_miss();
                return None;
            }
        };

        let envelope: CacheEnvelope<T> = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                debug!(%key, %error, "dropping unreadable cache entry");
                self.discard_if_unchanged(key.as_str(), &raw).await;
                self.record_miss();
                return None;
            }
        };

        if self.is_expired(envelope.timestamp) {
            debug!(%key, stored_at = %envelope.timestamp, "cache entry expired");
            self.discard_if_unchanged(key.as_str(), &raw).await;
            self.record_miss();
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_hit(self.storage.label());
        Some(envelope.data)
    }

    /// Stores `payload` for `path` and `query`.
    pub async fn put<T, K, V>(&self, path: &str, query: &[(K, V)], payload: &T)
    where
        T: Serialize + ?Sized,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.put_by_key(&CacheKey::new(path, query), payload).await
    }

    /// Stores `payload` under `key`, then enforces `max_entries`.
    pub async fn put_by_key<T>(&self, key: &CacheKey, payload: &T)
    where
        T: Serialize + ?Sized,
    {
        if !self.initialize().await {
            return;
        }

        let envelope = CacheEnvelope::new(payload, self.clock.now());
        let encoded = match serde_json::to_vec(&envelope) {
            Ok(encoded) => Bytes::from(encoded),
            Err(error) => {
                warn!(%key, %error, "cache payload is not serializable");
                return;
            }
        };

        let _guard = self.write_lock.lock().await;
        if let Err(error) = self.storage.put(key.as_str(), encoded).await {
            self.storage_error("put", &error);
            return;
        }
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.enforce_limit().await;
    }

    /// Removes the entry for `path` and `query`, if any.
    pub async fn remove<K, V>(&self, path: &str, query: &[(K, V)])
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if !self.initialize().await {
            return;
        }
        let _guard = self.write_lock.lock().await;
        self.discard(CacheKey::new(path, query).as_str()).await;
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        if !self.initialize().await {
            return;
        }
        let _guard = self.write_lock.lock().await;
        if let Err(error) = self.storage.clear().await {
            self.storage_error("clear", &error);
        }
    }

    /// Snapshot of the cache counters and current entry count.
    pub async fn stats(&self) -> CacheStats {
        let entries = if self.is_initialized() {
            match self.storage.keys().await {
                Ok(keys) => Some(keys.len()),
                Err(error) => {
                    self.storage_error("keys", &error);
                    None
                }
            }
        } else {
            None
        };

        CacheStats {
            entries,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            initialized: self.is_initialized(),
        }
    }

    fn is_expired(&self, stored_at: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(self.config.ttl).unwrap_or(TimeDelta::MAX);
        self.clock.now() - stored_at > ttl
    }

    /// Must be called with `write_lock` held.
    async fn enforce_limit(&self) {
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(error) => {
                self.storage_error("keys", &error);
                return;
            }
        };
        if keys.len() <= self.config.max_entries {
            return;
        }

        let mut dated = self.read_timestamps(keys).await;
        if dated.len() <= self.config.max_entries {
            return;
        }

        dated.sort();
        let excess = dated.len() - self.config.max_entries;
        let mut evicted = 0u64;
        for (stored_at, key) in dated.into_iter().take(excess) {
            debug!(key = %key, %stored_at, "evicting oldest cache entry");
            if self.discard(&key).await {
                evicted += 1;
            }
        }
        self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        metrics::record_evictions(self.storage.label(), evicted);
    }

    /// Must be called with `write_lock` held.
    async fn sweep_expired(&self) {
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(error) => {
                self.storage_error("keys", &error);
                return;
            }
        };

        let mut swept = 0usize;
        for (stored_at, key) in self.read_timestamps(keys).await {
            if self.is_expired(stored_at) && self.discard(&key).await {
                swept += 1;
            }
        }
        if swept > 0 {
            debug!(swept, "removed expired cache entries on open");
        }
    }

    /// Reads the insertion time of each key, discarding unreadable entries.
    async fn read_timestamps(&self, keys: Vec<String>) -> Vec<(DateTime<Utc>, String)> {
        let mut dated = Vec::with_capacity(keys.len());
        for key in keys {
            match self.storage.get(&key).await {
                Ok(Some(raw)) => match decode_header(&raw) {
                    Some(header) => dated.push((header.timestamp, key)),
                    None => {
                        debug!(key = %key, "dropping unreadable cache entry");
                        self.discard(&key).await;
                    }
                },
                Ok(None) => {}
                Err(error) => self.storage_error("get", &error),
            }
        }
        dated
    }

    /// Deletes `key` only if it still holds `seen`. A concurrent `put` wins.
    async fn discard_if_unchanged(&self, key: &str, seen: &[u8]) {
        let _guard = self.write_lock.lock().await;
        match self.storage.get(key).await {
            Ok(Some(current)) if current.as_ref() == seen => {
                self.discard(key).await;
            }
            Ok(_) => debug!(%key, "cache entry changed before removal, leaving it"),
            Err(error) => self.storage_error("get", &error),
        }
    }

    async fn discard(&self, key: &str) -> bool {
        match self.storage.delete(key).await {
            Ok(_) => true,
            Err(error) => {
                self.storage_error("delete", &error);
                false
            }
        }
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_miss(self.storage.label());
    }

    fn storage_error(&self, operation: &'static str, error: &StorageError) {
        warn!(
            storage = self.storage.label(),
            operation,
            %error,
            "cache storage error, degrading to miss"
        );
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_storage_error(self.storage.label());
    }
}

fn decode_header(raw: &[u8]) -> Option<EnvelopeHeader> {
    serde_json::from_slice(raw).ok()
}

/// Builder for [`ResponseCache`].
///
/// ```
/// use std::time::Duration;
/// use waypoint_cache::{MemoryStorage, ResponseCache};
///
/// let cache = ResponseCache::builder()
///     .storage(MemoryStorage::new())
///     .ttl(Duration::from_secs(60))
///     .max_entries(1_000)
///     .build();
/// assert!(!cache.is_initialized());
/// ```
pub struct ResponseCacheBuilder<S> {
    storage: S,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl ResponseCacheBuilder<MemoryStorage> {
    /// Creates a builder with in-memory storage and default bounds.
    pub fn new() -> Self {
        Self {
            storage: MemoryStorage::new(),
            config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Default for ResponseCacheBuilder<MemoryStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ResponseCacheBuilder<S>
where
    S: Storage,
{
    /// Replaces the storage.
    pub fn storage<NewS>(self, storage: NewS) -> ResponseCacheBuilder<NewS>
    where
        NewS: Storage,
    {
        ResponseCacheBuilder {
            storage,
            config: self.config,
            clock: self.clock,
        }
    }

    /// Replaces every bound at once.
    pub fn config(self, config: CacheConfig) -> Self {
        Self { config, ..self }
    }

    /// Maximum age of a returned entry.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Maximum number of entries kept after a write.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_entries = max_entries;
        self
    }

    /// Enables or disables the expiry sweep on open.
    pub fn sweep_on_init(mut self, enabled: bool) -> Self {
        self.config.sweep_on_init = enabled;
        self
    }

    /// Time source for entry timestamps.
    pub fn clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            ..self
        }
    }

    /// Builds the cache. Storage is opened lazily.
    pub fn build(self) -> ResponseCache<S> {
        ResponseCache::with_clock(self.storage, self.config, self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    #[tokio::test]
    async fn storage_is_opened_lazily() {
        let cache = ResponseCache::builder().build();
        assert!(!cache.is_initialized());

        let _: Option<String> = cache.get("/posts", &[("page", "1")]).await;
        assert!(cache.is_initialized());
    }

    #[tokio::test]
    async fn sweep_on_open_removes_expired_entries() {
        let clock = ManualClock::starting_now();
        let storage = MemoryStorage::new();
        let stale = CacheEnvelope::new("old", clock.now() - TimeDelta::minutes(10));
        storage.insert_raw(
            CacheKey::from_path("/old").as_str(),
            serde_json::to_vec(&stale).unwrap(),
        );
        storage.insert_raw("garbage", "not json");

        let cache = ResponseCache::builder()
            .storage(storage.clone())
            .ttl(Duration::from_secs(60))
            .clock(clock)
            .build();
        assert!(cache.initialize().await);

        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn sweep_can_be_disabled() {
        let clock = ManualClock::starting_now();
        let storage = MemoryStorage::new();
        let stale = CacheEnvelope::new("old", clock.now() - TimeDelta::minutes(10));
        storage.insert_raw(
            CacheKey::from_path("/old").as_str(),
            serde_json::to_vec(&stale).unwrap(),
        );

        let cache = ResponseCache::builder()
            .storage(storage.clone())
            .ttl(Duration::from_secs(60))
            .sweep_on_init(false)
            .clock(clock)
            .build();
        assert!(cache.initialize().await);

        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = ResponseCache::builder().build();
        let empty: [(&str, &str); 0] = [];

        cache.put("/a", &empty, &1u32).await;
        let _: Option<u32> = cache.get("/a", &empty).await;
        let _: Option<u32> = cache.get("/b", &empty).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, Some(1));
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert!(stats.initialized);
    }
}
