//! OffloadManager implementation for background task execution.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};
use waypoint_cache::CacheKey;

use crate::metrics;

use super::policy::{OffloadConfig, TimeoutPolicy};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Key for identifying background tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OffloadKey {
    /// Revalidation of a cached response. Deduplicated while in flight.
    Revalidate(CacheKey),
}

impl OffloadKey {
    /// Kind of the task, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Revalidate(_) => "revalidate",
        }
    }
}

impl From<CacheKey> for OffloadKey {
    fn from(key: CacheKey) -> Self {
        Self::Revalidate(key)
    }
}

/// Handle to a spawned background task.
#[derive(Debug)]
pub struct OffloadHandle {
    id: u64,
    handle: JoinHandle<()>,
}

impl OffloadHandle {
    /// Check if the task is finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct OffloadManagerInner {
    config: OffloadConfig,
    tasks: DashMap<OffloadKey, OffloadHandle>,
    next_id: AtomicU64,
}

/// Registry of detached background tasks.
///
/// Used by the [`Client`](crate::Client) to revalidate cached responses
/// without delaying the caller. Tasks are tracked until they finish so they
/// can be deduplicated, awaited or aborted on shutdown. A task that panics or
/// times out is logged and forgotten.
#[derive(Clone, Debug)]
pub struct OffloadManager {
    inner: Arc<OffloadManagerInner>,
}

impl OffloadManager {
    /// Create a new OffloadManager with the given configuration.
    pub fn new(config: OffloadConfig) -> Self {
        Self {
            inner: Arc::new(OffloadManagerInner {
                config,
                tasks: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Create a new OffloadManager with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(OffloadConfig::default())
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn a task with a specific key.
    ///
    /// With deduplication enabled, a task is skipped while another with the
    /// same key is still running. Without it the new task replaces the
    /// tracked one, which keeps running untracked.
    ///
    /// Returns `true` if the task was spawned, `false` if it was deduplicated.
    pub fn spawn_with_key<K, F>(&self, key: K, task: F) -> bool
    where
        K: Into<OffloadKey>,
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let kind = key.kind();
        let dedup = self.inner.config.deduplicate;

        match self.inner.tasks.entry(key.clone()) {
            Entry::Occupied(entry) if dedup && !entry.get().is_finished() => {
                debug!(?key, "task deduplicated, already in flight");
                metrics::record_offload_deduplicated(kind);
                false
            }
            entry => {
                let id = self.next_id();
                let handle = self.spawn_inner(id, key, task);
                entry.insert(OffloadHandle { id, handle });
                metrics::record_offload_spawned(kind);
                true
            }
        }
    }

    /// Get the number of currently active tasks.
    pub fn active_task_count(&self) -> usize {
        self.inner.tasks.iter().filter(|e| !e.is_finished()).count()
    }

    /// Clean up finished task handles.
    pub fn cleanup_finished(&self) {
        self.inner.tasks.retain(|_, handle| !handle.is_finished());
    }

    /// Cancel all running tasks.
    pub fn cancel_all(&self) {
        for entry in self.inner.tasks.iter() {
            entry.abort();
        }
        self.inner.tasks.clear();
    }

    /// Check if a task with the given key is in flight.
    pub fn is_in_flight(&self, key: &OffloadKey) -> bool {
        self.inner.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Wait for all currently tracked tasks to complete.
    pub async fn wait_all(&self) {
        loop {
            self.cleanup_finished();
            if self.inner.tasks.is_empty() {
                break;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Wait for all tasks with a timeout.
    ///
    /// Returns `true` if all tasks completed within the timeout.
    pub async fn wait_all_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_all()).await.is_ok()
    }

    fn spawn_inner<F>(&self, id: u64, key: OffloadKey, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timeout_policy = self.inner.config.timeout_policy;
        let inner = Arc::downgrade(&self.inner);
        let kind = key.kind();
        let span = info_span!("offload_task", kind, key = ?key);

        tokio::spawn(
            async move {
                let start = Instant::now();
                let timed_out = match timeout_policy {
                    TimeoutPolicy::None => {
                        task.await;
                        false
                    }
                    TimeoutPolicy::Cancel(duration) => {
                        let timed_out = tokio::time::timeout(duration, task).await.is_err();
                        if timed_out {
                            warn!(?key, "background task cancelled due to timeout");
                        }
                        timed_out
                    }
                };
                metrics::record_offload_finished(kind, start.elapsed(), timed_out);
                if let Some(inner) = inner.upgrade() {
                    inner.tasks.remove_if(&key, |_, handle| handle.id == id);
                }
            }
            .instrument(span),
        )
    }
}

impl Default for OffloadManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}
