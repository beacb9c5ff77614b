//! Connectivity state machine.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

use crate::metrics;

use super::{InterfaceKind, NetworkSignal, ReachabilityProbe, SignalError};

const EVENT_CAPACITY: usize = 16;

/// Connectivity as seen by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    /// Not checked yet, or the network signal failed.
    #[default]
    Unknown,
    /// A link is up and at least one probe endpoint answered.
    Online,
    /// No usable link, or every probe endpoint failed.
    Offline,
}

impl NetworkStatus {
    /// Lowercase name, as used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a [`ConnectivityMonitor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectivityState {
    /// Current status.
    pub status: NetworkStatus,
    /// Whether [`ConnectivityMonitor::initialize`] has succeeded.
    pub initialized: bool,
    /// Last network signal error, cleared by the next successful check.
    pub last_error: Option<String>,
}

/// Connectivity check settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Endpoints probed in order; the first 2xx answer means online.
    /// With an empty list a routable link is enough.
    pub probe_endpoints: Vec<String>,
    /// Timeout of a single probe (e.g. "5s").
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Interval of the periodic re-check (e.g. "30s").
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_endpoints: vec![
                "https://www.google.com/generate_204".to_owned(),
                "https://cloudflare.com/cdn-cgi/trace".to_owned(),
                "https://captive.apple.com/hotspot-detect.html".to_owned(),
            ],
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
        }
    }
}

struct Inner {
    config: ConnectivityConfig,
    endpoints: Vec<Url>,
    signal: Arc<dyn NetworkSignal>,
    probe: Arc<dyn ReachabilityProbe>,
    state: Mutex<ConnectivityState>,
    events: broadcast::Sender<NetworkStatus>,
    check_lock: tokio::sync::Mutex<()>,
    init_lock: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(watcher) = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
    }
}

/// Tracks whether the internet is reachable.
///
/// A check first asks the [`NetworkSignal`] for interfaces. Without a
/// routable one the status is offline. Otherwise the probe endpoints are
/// tried in order and the first 2xx answer means online; if all of them fail
/// the status is offline even though a link is up (captive portals, broken
/// uplinks). A signal error sets the status to unknown.
///
/// After [`initialize`](Self::initialize) a watcher task re-checks on every
/// signal change and every `poll_interval`. Status changes are broadcast to
/// [`subscribe`](Self::subscribe)rs; repeated identical results emit nothing.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectivityMonitor {
    /// Creates a monitor. Nothing is checked until [`initialize`](Self::initialize).
    ///
    /// Endpoints that are not valid URLs are skipped with a warning.
    pub fn new(
        signal: Arc<dyn NetworkSignal>,
        probe: Arc<dyn ReachabilityProbe>,
        config: ConnectivityConfig,
    ) -> Self {
        let endpoints = config
            .probe_endpoints
            .iter()
            .filter_map(|endpoint| match Url::parse(endpoint) {
                Ok(url) => Some(url),
                Err(error) => {
                    warn!(%endpoint, %error, "ignoring invalid probe endpoint");
                    None
                }
            })
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                endpoints,
                signal,
                probe,
                state: Mutex::new(ConnectivityState::default()),
                events,
                check_lock: tokio::sync::Mutex::new(()),
                init_lock: tokio::sync::Mutex::new(()),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Runs the first check and starts the watcher.
    ///
    /// Returns `false` if the network signal failed; a later call retries.
    /// Once successful, further calls return `true` without checking.
    pub async fn initialize(&self) -> bool {
        let _guard = self.inner.init_lock.lock().await;
        if self.state().initialized {
            return true;
        }

        if let Err(error) = self.check().await {
            debug!(%error, "connectivity initialization failed");
            return false;
        }
        self.lock_state().initialized = true;
        self.start_watcher();
        true
    }

    /// Forces an immediate re-check and returns the resulting status.
    pub async fn refresh(&self) -> NetworkStatus {
        self.check().await.unwrap_or(NetworkStatus::Unknown)
    }

    /// Subscribes to status changes. Past changes are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatus> {
        self.inner.events.subscribe()
    }

    /// Status changes as a stream. Past changes are not replayed.
    pub fn status_stream(&self) -> BoxStream<'static, NetworkStatus> {
        stream::unfold(self.subscribe(), |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(status) => return Some((status, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "status stream lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    /// Current status.
    pub fn status(&self) -> NetworkStatus {
        self.lock_state().status
    }

    /// Full state snapshot.
    pub fn state(&self) -> ConnectivityState {
        self.lock_state().clone()
    }

    /// Returns `true` only when the status is [`NetworkStatus::Online`].
    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Returns `true` only when the status is [`NetworkStatus::Offline`].
    pub fn is_offline(&self) -> bool {
        self.status() == NetworkStatus::Offline
    }

    /// Stops the watcher task. The monitor can be initialized again.
    pub fn dispose(&self) {
        let watcher = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
            debug!("connectivity watcher stopped");
        }
        self.lock_state().initialized = false;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectivityState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn check(&self) -> Result<NetworkStatus, SignalError> {
        let _guard = self.inner.check_lock.lock().await;

        let interfaces = match self.inner.signal.interfaces().await {
            Ok(interfaces) => interfaces,
            Err(error) => {
                warn!(%error, "network signal failed");
                self.transition(NetworkStatus::Unknown, Some(error.to_string()));
                return Err(error);
            }
        };

        let status = if !interfaces.iter().any(InterfaceKind::is_routable) {
            debug!(?interfaces, "no routable interface");
            NetworkStatus::Offline
        } else if self.probe_endpoints().await {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        self.transition(status, None);
        Ok(status)
    }

    async fn probe_endpoints(&self) -> bool {
        if self.inner.endpoints.is_empty() {
            return true;
        }
        for endpoint in &self.inner.endpoints {
            if self
                .inner
                .probe
                .probe(endpoint, self.inner.config.probe_timeout)
                .await
            {
                return true;
            }
            debug!(%endpoint, "probe endpoint unreachable");
        }
        false
    }

    fn transition(&self, status: NetworkStatus, last_error: Option<String>) {
        let previous = {
            let mut state = self.lock_state();
            let previous = state.status;
            state.status = status;
            state.last_error = last_error;
            previous
        };

        if previous != status {
            info!(from = %previous, to = %status, "connectivity changed");
            metrics::record_transition(status.as_str());
            // no subscribers is fine
            let _ = self.inner.events.send(status);
        }
    }

    fn start_watcher(&self) {
        let inner = Arc::downgrade(&self.inner);
        let mut changes = self.inner.signal.changes();
        let period = self.inner.config.poll_interval;

        let task = async move {
            let mut poll = tokio::time::interval_at(Instant::now() + period, period);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut signal_open = true;

            loop {
                tokio::select! {
                    change = changes.next(), if signal_open => {
                        if change.is_none() {
                            debug!("network signal stream ended, polling only");
                            signal_open = false;
                            continue;
                        }
                    }
                    _ = poll.tick() => {}
                }

                let Some(inner) = inner.upgrade() else {
                    break;
                };
                ConnectivityMonitor { inner }.refresh().await;
            }
        };

        let handle = tokio::spawn(task.instrument(info_span!("connectivity_watcher")));
        let previous = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}
