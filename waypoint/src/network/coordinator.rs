//! Offline queue and replay on reconnect.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use http::{Extensions, Method};
use reqwest::{Request, Response};
use reqwest_middleware::ClientWithMiddleware;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cached::{CachedResponse, SharedCache, UseCache};
use crate::cancel::{self, CancelToken};
use crate::connectivity::{ConnectivityMonitor, NetworkStatus};
use crate::metrics;
use crate::{Error, Result};

use super::sentinel::offline_response;
use super::{NetworkConfig, NetworkPolicy};

type Slot = oneshot::Sender<Result<Response>>;

struct QueuedRequest {
    id: u64,
    request: Request,
    extensions: Extensions,
    use_cache: Option<UseCache>,
    enqueued_at: Instant,
    cancel: Option<CancelToken>,
    slot: Slot,
}

impl QueuedRequest {
    fn resolve(self, outcome: Result<Response>, label: &'static str) {
        resolve_slot(self.id, self.slot, outcome, label);
    }
}

fn resolve_slot(id: u64, slot: Slot, outcome: Result<Response>, label: &'static str) {
    debug!(id, outcome = label, "queued request resolved");
    metrics::record_resolved(label);
    // the caller may have stopped waiting
    let _ = slot.send(outcome);
}

#[derive(Default)]
struct OfflineQueue {
    entries: VecDeque<QueuedRequest>,
    next_id: u64,
    closed: bool,
}

struct Inner {
    monitor: ConnectivityMonitor,
    cache: SharedCache,
    replay: ClientWithMiddleware,
    config: NetworkConfig,
    queue: Mutex<OfflineQueue>,
    drain_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, OfflineQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) -> Option<QueuedRequest> {
        let mut queue = self.lock_queue();
        let position = queue.entries.iter().position(|entry| entry.id == id)?;
        queue.entries.remove(position)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}

/// Handle to a request waiting in the offline queue.
///
/// Found in the extensions of the offline response (and in
/// [`ApiResponse::queued`](crate::ApiResponse::queued)). Clones share the
/// same outcome; only the first [`wait`](Self::wait) receives it.
#[derive(Clone)]
pub struct QueuedReply {
    id: u64,
    receiver: Arc<Mutex<Option<oneshot::Receiver<Result<Response>>>>>,
    queue: Weak<Inner>,
    cancel: Option<CancelToken>,
    deadline: Instant,
}

impl std::fmt::Debug for QueuedReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedReply")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl QueuedReply {
    /// Queue-local identifier of the request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the replayed response.
    ///
    /// Fails with [`Error::OfflineTimeout`] once the queue timeout has elapsed
    /// since the request was queued,
    /// [`Error::Cancelled`] if the request's token is cancelled or the client
    /// shuts down, and [`Error::QueueCleared`] if the queue is cleared. In the
    /// first two cases the request is removed from the queue.
    pub async fn wait(self) -> Result<Response> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(receiver) = receiver else {
            return Err(Error::Closed);
        };

        tokio::select! {
            biased;
            outcome = receiver => outcome.unwrap_or(Err(Error::Closed)),
            _ = cancel::cancelled(self.cancel.as_ref()) => self.abandon(Error::Cancelled, "cancelled"),
            _ = tokio::time::sleep_until(self.deadline) => self.abandon(Error::OfflineTimeout, "timeout"),
        }
    }

    fn abandon(&self, error: Error, label: &'static str) -> Result<Response> {
        if let Some(queue) = self.queue.upgrade()
            && queue.remove(self.id).is_some()
        {
            debug!(id = self.id, outcome = label, "queued request abandoned");
            metrics::record_resolved(label);
        }
        Err(error)
    }
}

/// Offline queue of a client.
///
/// Requests that cannot go out while offline are kept in FIFO order and
/// replayed once the [`ConnectivityMonitor`] reports `online` again. Replay
/// goes through a separate client holding the downstream stages (auth and
/// transport) over the same `reqwest::Client`.
///
/// Cloning is cheap and clones share the queue.
#[derive(Clone)]
pub struct NetworkCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NetworkCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCoordinator")
            .field("config", &self.inner.config)
            .field("queued", &self.queued_requests_count())
            .finish()
    }
}

impl NetworkCoordinator {
    /// Creates a coordinator. Queued requests are replayed through `replay`.
    pub fn new(
        monitor: ConnectivityMonitor,
        cache: SharedCache,
        replay: ClientWithMiddleware,
        config: NetworkConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                monitor,
                cache,
                replay,
                config,
                queue: Mutex::new(OfflineQueue::default()),
                drain_lock: tokio::sync::Mutex::new(()),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Monitor consulted before each request.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.inner.monitor
    }

    /// Active settings.
    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// Policy applied to requests without a [`NetworkPolicy`] extension.
    pub fn default_policy(&self) -> NetworkPolicy {
        NetworkPolicy::from(&self.inner.config)
    }

    /// Starts replaying the queue on every transition to `online`.
    ///
    /// Calling it again has no effect.
    pub fn start(&self) {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let mut events = self.inner.monitor.subscribe();
        let inner = Arc::downgrade(&self.inner);
        let task = async move {
            loop {
                let status = match events.recv().await {
                    Ok(status) => status,
                    Err(RecvError::Lagged(_)) => NetworkStatus::Unknown,
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let coordinator = NetworkCoordinator { inner };
                if status == NetworkStatus::Online || coordinator.monitor().is_online() {
                    coordinator.drain().await;
                }
            }
        };
        *listener = Some(tokio::spawn(task.instrument(info_span!("offline_queue"))));
    }

    /// Number of requests waiting in the queue.
    pub fn queued_requests_count(&self) -> usize {
        self.inner.lock_queue().entries.len()
    }

    /// Rejects every queued request with [`Error::QueueCleared`].
    ///
    /// Returns the number of rejected requests.
    pub fn clear_queue(&self) -> usize {
        let entries = std::mem::take(&mut self.inner.lock_queue().entries);
        let count = entries.len();
        for entry in entries {
            entry.resolve(Err(Error::QueueCleared), "cleared");
        }
        if count > 0 {
            info!(count, "offline queue cleared");
        }
        count
    }

    /// Rejects every queued request with [`Error::Cancelled`], refuses new
    /// ones and stops listening for reconnects.
    pub fn close(&self) {
        let entries = {
            let mut queue = self.inner.lock_queue();
            queue.closed = true;
            std::mem::take(&mut queue.entries)
        };
        for entry in entries {
            entry.resolve(Err(Error::Cancelled), "cancelled");
        }
        let listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
        debug!("offline queue closed");
    }

    /// Adds a request to the queue.
    ///
    /// If the monitor already reports `online` and no drain is running, a
    /// drain is started right away.
    pub fn enqueue(&self, request: Request, extensions: Extensions) -> Result<QueuedReply> {
        let (slot, receiver) = oneshot::channel();
        let cancel = extensions.get::<CancelToken>().cloned();
        let use_cache = extensions.get::<UseCache>().cloned();

        let enqueued_at = Instant::now();
        let id = {
            let mut queue = self.inner.lock_queue();
            if queue.closed {
                return Err(Error::Closed);
            }
            let id = queue.next_id;
            queue.next_id += 1;
            debug!(id, method = %request.method(), url = %request.url(), "request queued until online");
            queue.entries.push_back(QueuedRequest {
                id,
                request,
                extensions,
                use_cache,
                enqueued_at,
                cancel: cancel.clone(),
                slot,
            });
            id
        };
        metrics::record_queued();

        // The reconnect may have been handled before this push landed.
        if self.inner.monitor.is_online() && self.inner.drain_lock.try_lock().is_ok() {
            let coordinator = self.clone();
            tokio::spawn(
                async move {
                    coordinator.drain().await;
                }
                .instrument(info_span!("offline_queue")),
            );
        }

        Ok(QueuedReply {
            id,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            queue: Arc::downgrade(&self.inner),
            cancel,
            deadline: enqueued_at + self.inner.config.queue_timeout,
        })
    }

    /// Answers a request that cannot go out because the device is offline.
    ///
    /// `GET` and `HEAD` are served from the cache when possible, otherwise
    /// queued. Other methods fail with [`Error::Offline`] when
    /// `throw_on_offline` is set, are queued when `queue_when_offline` is set,
    /// and get the unqueued offline response otherwise.
    pub async fn respond_offline(
        &self,
        request: Request,
        extensions: &Extensions,
        policy: &NetworkPolicy,
    ) -> Result<Response> {
        let idempotent = matches!(*request.method(), Method::GET | Method::HEAD);

        if idempotent {
            if let Some(UseCache(key)) = extensions.get::<UseCache>()
                && let Some(hit) = self.inner.cache.get_by_key::<CachedResponse>(key).await
            {
                debug!(url = %request.url(), "offline, serving cached response");
                metrics::record_offline_cache_hit();
                return Ok(hit.into_response());
            }
            let reply = self.enqueue(request, extensions.clone())?;
            return Ok(offline_response(Some(reply)));
        }

        if policy.throw_on_offline {
            return Err(Error::Offline);
        }
        if policy.queue_when_offline {
            let reply = self.enqueue(request, extensions.clone())?;
            return Ok(offline_response(Some(reply)));
        }
        debug!(method = %request.method(), url = %request.url(), "offline, request dropped");
        Ok(offline_response(None))
    }

    /// Replays the requests queued so far, in order.
    ///
    /// Requests queued while the drain runs wait for the next reconnect. If
    /// the device goes offline again mid-way the rest is put back at the
    /// front of the queue. Returns the number of replayed requests.
    pub async fn drain(&self) -> usize {
        let _guard = self.inner.drain_lock.lock().await;
        let mut batch = std::mem::take(&mut self.inner.lock_queue().entries);
        if batch.is_empty() {
            return 0;
        }
        info!(count = batch.len(), "replaying offline queue");

        let mut replayed = 0;
        while let Some(entry) = batch.pop_front() {
            if entry.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                entry.resolve(Err(Error::Cancelled), "cancelled");
                continue;
            }
            if entry.enqueued_at.elapsed() > self.inner.config.queue_timeout {
                entry.resolve(Err(Error::OfflineTimeout), "timeout");
                continue;
            }
            if self.inner.monitor.is_offline() {
                batch.push_front(entry);
                self.requeue(batch);
                break;
            }

            self.replay(entry).await;
            replayed += 1;
        }
        replayed
    }

    fn requeue(&self, mut batch: VecDeque<QueuedRequest>) {
        warn!(count = batch.len(), "connection lost while replaying, requeueing");
        let mut queue = self.inner.lock_queue();
        if queue.closed {
            drop(queue);
            for entry in batch {
                entry.resolve(Err(Error::Cancelled), "cancelled");
            }
            return;
        }
        batch.append(&mut queue.entries);
        queue.entries = batch;
    }

    async fn replay(&self, entry: QueuedRequest) {
        let QueuedRequest {
            id,
            request,
            mut extensions,
            use_cache,
            enqueued_at,
            cancel,
            slot,
        } = entry;
        debug!(
            id,
            url = %request.url(),
            waited_ms = enqueued_at.elapsed().as_millis(),
            "replaying queued request"
        );

        let send = self.inner.replay.execute_with_extensions(request, &mut extensions);
        let outcome = tokio::select! {
            result = send => match result {
                Ok(response) => self.store(use_cache, response).await,
                Err(error) => Err(Error::from(error)),
            },
            _ = cancel::cancelled(cancel.as_ref()) => Err(Error::Cancelled),
        };

        let label = if outcome.is_ok() { "replayed" } else { "failed" };
        resolve_slot(id, slot, outcome, label);
    }

    /// Stores a successful replayed `GET` and returns an equivalent response.
    async fn store(&self, use_cache: Option<UseCache>, response: Response) -> Result<Response> {
        let Some(UseCache(key)) = use_cache else {
            return Ok(response);
        };
        if !response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        self.inner
            .cache
            .put_by_key(&key, &CachedResponse::new(status, &headers, &body))
            .await;

        let mut rebuilt = http::Response::new(body);
        *rebuilt.status_mut() = status;
        *rebuilt.headers_mut() = headers;
        Ok(Response::from(rebuilt))
    }
}
