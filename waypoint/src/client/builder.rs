use std::sync::Arc;
use std::time::Duration;

use reqwest_middleware::ClientBuilder as PipelineBuilder;
use tracing::debug;
use url::Url;
use waypoint_cache::{Clock, MemoryStorage, ResponseCache, Storage, SystemClock};

use crate::auth::{AuthCallbacks, AuthCoordinator, AuthStage};
use crate::cached::SharedCache;
use crate::config::ClientConfig;
use crate::connectivity::{
    AssumeConnected, ConnectivityMonitor, HttpProbe, NetworkSignal, ReachabilityProbe,
};
use crate::network::{NetworkCoordinator, NetworkStage};
use crate::offload::{OffloadConfig, OffloadManager, TimeoutPolicy};
use crate::pipeline::{self, LoggingStage, StageName};
use crate::Result;

use super::encrypt::{BodyEncryptor, IdentityEncryptor};
use super::{Client, ClientInner};

/// Builder of a [`Client`].
///
/// Everything but the base URL is optional: the defaults are an in-memory
/// cache, a signal that always reports a wired link, HTTP reachability
/// probes and no authentication.
pub struct ClientBuilder {
    base_url: String,
    config: ClientConfig,
    http: Option<reqwest::Client>,
    storage: Option<Arc<dyn Storage>>,
    clock: Option<Arc<dyn Clock>>,
    signal: Option<Arc<dyn NetworkSignal>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    callbacks: Option<Arc<dyn AuthCallbacks>>,
    encryptor: Option<Arc<dyn BodyEncryptor>>,
}

impl ClientBuilder {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            config: ClientConfig::default(),
            http: None,
            storage: None,
            clock: None,
            signal: None,
            probe: None,
            callbacks: None,
            encryptor: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Underlying `reqwest` client, shared with the reachability probe.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Cache storage.
    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Time source of the cache.
    pub fn cache_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Source of link availability.
    pub fn signal(mut self, signal: impl NetworkSignal + 'static) -> Self {
        self.signal = Some(Arc::new(signal));
        self
    }

    /// Internet reachability check.
    pub fn probe(mut self, probe: impl ReachabilityProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Token callbacks. Without them `401` responses are returned as is.
    pub fn auth_callbacks(mut self, callbacks: impl AuthCallbacks + 'static) -> Self {
        self.callbacks = Some(Arc::new(callbacks));
        self
    }

    /// Encryptor used by requests with `encrypt_body`.
    pub fn body_encryptor(mut self, encryptor: impl BodyEncryptor + 'static) -> Self {
        self.encryptor = Some(Arc::new(encryptor));
        self
    }

    /// Pipeline stages in request order.
    pub fn stages(mut self, stages: impl IntoIterator<Item = StageName>) -> Self {
        self.config.stages = stages.into_iter().collect();
        self
    }

    /// Default per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Assembles the client.
    ///
    /// Fails if the base URL is invalid or a stage is listed twice. Nothing
    /// is started: call [`Client::initialize`] before the first request.
    pub fn build(self) -> Result<Client> {
        let base_url = Url::parse(&self.base_url)?;
        pipeline::validate(&self.config.stages)?;
        let config = self.config;

        let http = self.http.unwrap_or_default();
        let storage: Arc<dyn Storage> = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache: SharedCache = Arc::new(ResponseCache::with_clock(
            storage,
            config.cache,
            clock,
        ));

        let signal: Arc<dyn NetworkSignal> =
            self.signal.unwrap_or_else(|| Arc::new(AssumeConnected));
        let probe: Arc<dyn ReachabilityProbe> = self
            .probe
            .unwrap_or_else(|| Arc::new(HttpProbe::new(http.clone())));
        let monitor = ConnectivityMonitor::new(signal, probe, config.connectivity.clone());

        let auth = AuthCoordinator::new(config.auth.clone());
        if let Some(callbacks) = self.callbacks {
            auth.configure(callbacks, config.auth.clone());
        }

        // Queued requests already passed the logging and network stages.
        let mut replay = PipelineBuilder::new(http.clone());
        if config.stages.contains(&StageName::Auth) {
            replay = replay.with(AuthStage::new(auth.clone()));
        }
        let network = NetworkCoordinator::new(
            monitor.clone(),
            cache.clone(),
            replay.build(),
            config.network.clone(),
        );

        let mut pipeline = PipelineBuilder::new(http);
        for stage in &config.stages {
            pipeline = match stage {
                StageName::Logging => pipeline.with(LoggingStage),
                StageName::Network => pipeline.with(NetworkStage::new(network.clone())),
                StageName::Auth => pipeline.with(AuthStage::new(auth.clone())),
            };
        }

        let timeout_policy = match config.revalidation.timeout {
            Some(timeout) => TimeoutPolicy::Cancel(timeout),
            None => TimeoutPolicy::None,
        };
        let offload = OffloadManager::new(
            OffloadConfig::builder()
                .timeout_policy(timeout_policy)
                .build(),
        );
        let encryptor = self
            .encryptor
            .unwrap_or_else(|| Arc::new(IdentityEncryptor));

        debug!(base_url = %base_url, stages = ?config.stages, "client built");
        Ok(Client {
            inner: Arc::new(ClientInner {
                base_url,
                http: pipeline.build(),
                config,
                cache,
                monitor,
                auth,
                network,
                offload,
                encryptor,
            }),
        })
    }
}
