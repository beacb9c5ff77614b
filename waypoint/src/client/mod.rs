//! The client facade.
//!
//! [`Client`] joins paths to a base URL, runs every request through the
//! configured stages and adds the read-through response cache on top.

mod builder;
mod encrypt;
mod options;
mod response;

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use http::Method;
use http::header::{CONTENT_TYPE, HeaderValue};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{Instrument, debug, debug_span, warn};
use url::Url;
use waypoint_cache::{CacheKey, CacheStats};

use crate::auth::{AuthCallbacks, AuthConfig, AuthCoordinator, AuthStatus, RefreshCall};
use crate::cached::{SharedCache, UseCache};
use crate::cancel::{self, CancelToken};
use crate::config::ClientConfig;
use crate::connectivity::{ConnectivityMonitor, NetworkStatus};
use crate::network::{NetworkCoordinator, NetworkExtra, NetworkPolicy};
use crate::offload::{OffloadKey, OffloadManager};
use crate::{Error, Result};

pub use builder::ClientBuilder;
pub use encrypt::{BodyEncryptor, IdentityEncryptor};
pub use options::{NetworkOverrides, RequestOptions};
pub use response::{ApiResponse, Download, PendingReplay};

/// Connectivity-aware HTTP client.
///
/// Cloning is cheap; clones share the cache, the offline queue and the
/// token state.
///
/// ```no_run
/// # async fn run() -> waypoint::Result<()> {
/// use waypoint::{Client, RequestOptions};
///
/// let client = Client::builder("https://api.example.com/v1").build()?;
/// client.initialize().await;
///
/// let posts = client
///     .get("/posts", RequestOptions::new().use_cache(true))
///     .await?;
/// if posts.is_offline() {
///     // answered while offline; `posts.queued` resolves after reconnect
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Url,
    http: ClientWithMiddleware,
    config: ClientConfig,
    cache: SharedCache,
    monitor: ConnectivityMonitor,
    auth: AuthCoordinator,
    network: NetworkCoordinator,
    offload: OffloadManager,
    encryptor: Arc<dyn BodyEncryptor>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("stages", &self.inner.config.stages)
            .finish()
    }
}

impl Client {
    /// Starts building a client for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    /// Opens the cache, starts connectivity monitoring and the offline queue.
    ///
    /// Returns whether both the cache and the monitor are ready. A failed
    /// part is retried on the next call.
    pub async fn initialize(&self) -> bool {
        let cache = self.inner.cache.initialize().await;
        self.inner.network.start();
        let monitor = self.inner.monitor.initialize().await;
        if !cache || !monitor {
            warn!(cache, monitor, "client initialization incomplete");
        }
        cache && monitor
    }

    /// Stops background work and rejects queued requests with
    /// [`Error::Cancelled`].
    pub fn shutdown(&self) {
        self.inner.offload.cancel_all();
        self.inner.network.close();
        self.inner.monitor.dispose();
        debug!("client shut down");
    }

    /// Sends a `GET`.
    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request::<()>(Method::GET, path, None, options).await
    }

    /// Sends a `HEAD`.
    pub async fn head(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request::<()>(Method::HEAD, path, None, options).await
    }

    /// Sends a `DELETE`.
    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request::<()>(Method::DELETE, path, None, options).await
    }

    /// Sends a `POST` with a JSON body.
    pub async fn post<B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<ApiResponse>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body), options).await
    }

    /// Sends a `PUT` with a JSON body.
    pub async fn put<B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<ApiResponse>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(body), options).await
    }

    /// Sends a `PATCH` with a JSON body.
    pub async fn patch<B>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ApiResponse>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, Some(body), options).await
    }

    /// Sends a request.
    ///
    /// A `GET` with [`use_cache`](RequestOptions::use_cache) is answered from
    /// the cache when a fresh entry exists, and the entry is then refreshed
    /// in the background. On a miss a `2xx` answer is stored.
    pub async fn request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<ApiResponse>
    where
        B: Serialize + ?Sized,
    {
        let cache_key =
            (method == Method::GET && options.use_cache).then(|| CacheKey::new(path, &options.query));

        if let Some(key) = &cache_key
            && let Some(hit) = self.inner.cache.get_by_key(key).await
        {
            debug!(path, "serving cached response");
            self.revalidate(key.clone(), path, &options);
            return Ok(ApiResponse::from_cached(hit));
        }

        let response = self
            .send(method, path, body, &options, cache_key.clone())
            .await?;
        let response = ApiResponse::read(response).await?;

        if let Some(key) = cache_key
            && response.is_success()
            && !response.from_cache
        {
            self.inner.cache.put_by_key(&key, &response.to_cached()).await;
        }
        Ok(response)
    }

    /// Streams a `GET` response body into `destination`.
    ///
    /// The file is only created for a `2xx` answer. A partially written file
    /// is removed when the transfer fails or is cancelled.
    pub async fn download(
        &self,
        path: &str,
        destination: impl AsRef<Path>,
        options: RequestOptions,
    ) -> Result<Download> {
        let destination = destination.as_ref();
        let response = self
            .send::<()>(Method::GET, path, None, &options, None)
            .await?;
        let status = response.status();
        let network = response.extensions().get::<NetworkExtra>().copied();
        if !status.is_success() {
            return Ok(Download {
                status,
                bytes_written: 0,
                network,
            });
        }

        let written = async {
            let mut file = tokio::fs::File::create(destination).await?;
            let mut stream = response.bytes_stream();
            let mut written = 0u64;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel::cancelled(options.cancel.as_ref()) => None,
                    chunk = stream.next() => Some(chunk),
                };
                let Some(chunk) = next.ok_or(Error::Cancelled)? else {
                    break;
                };
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<_, Error>(written)
        }
        .await;

        match written {
            Ok(bytes_written) => {
                debug!(path, bytes_written, "download finished");
                Ok(Download {
                    status,
                    bytes_written,
                    network: None,
                })
            }
            Err(error) => {
                if let Err(remove) = tokio::fs::remove_file(destination).await {
                    debug!(error = %remove, "cannot remove partial download");
                }
                Err(error)
            }
        }
    }

    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: &RequestOptions,
        cache_key: Option<CacheKey>,
    ) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let url = self.url(path, &options.query)?;
        let mut builder = self
            .inner
            .http
            .request(method, url)
            .headers(options.headers.clone())
            .with_extension(self.policy(options));
        if let Some(timeout) = options.timeout.or(self.inner.config.timeout) {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = self.body(builder, body, options).await?;
        }
        if let Some(key) = cache_key {
            builder = builder.with_extension(UseCache(key));
        }
        if let Some(token) = &options.cancel {
            builder = builder.with_extension(token.clone());
        }
        if options.refresh_call {
            builder = builder.with_extension(RefreshCall);
        }

        tokio::select! {
            biased;
            _ = cancel::cancelled(options.cancel.as_ref()) => Err(Error::Cancelled),
            result = builder.send() => result.map_err(Error::from),
        }
    }

    async fn body<B>(
        &self,
        builder: RequestBuilder,
        body: &B,
        options: &RequestOptions,
    ) -> Result<RequestBuilder>
    where
        B: Serialize + ?Sized,
    {
        let json = serde_json::to_string(body)?;
        let (payload, content_type) = if options.encrypt_body {
            let cipher = self
                .inner
                .encryptor
                .encrypt(json)
                .await
                .map_err(Error::Encryption)?;
            (cipher, "text/plain")
        } else {
            (json, "application/json")
        };

        let builder = if options.headers.contains_key(CONTENT_TYPE) {
            builder
        } else {
            builder.header(CONTENT_TYPE, HeaderValue::from_static(content_type))
        };
        Ok(builder.body(payload))
    }

    fn policy(&self, options: &RequestOptions) -> NetworkPolicy {
        options.network.apply(self.inner.network.default_policy())
    }

    /// Joins `path` to the base URL. Absolute URLs are used as is.
    fn url(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = match Url::parse(path) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                let base = self.inner.base_url.as_str().trim_end_matches('/');
                Url::parse(&format!("{base}/{}", path.trim_start_matches('/')))?
            }
        };
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn revalidate(&self, key: CacheKey, path: &str, options: &RequestOptions) {
        if !self.inner.config.revalidation.enabled {
            return;
        }
        if self.inner.monitor.is_offline() {
            debug!(path, "offline, revalidation skipped");
            return;
        }

        let mut options = options.clone();
        options.use_cache = false;
        options.cancel = None;
        options.network.handle_network = Some(false);

        let client = self.clone();
        let path = path.to_owned();
        let span = debug_span!("revalidate", path = %path);
        self.inner.offload.spawn_with_key(
            OffloadKey::Revalidate(key.clone()),
            async move {
                let result = async {
                    let response = client
                        .send::<()>(Method::GET, &path, None, &options, None)
                        .await?;
                    ApiResponse::read(response).await
                }
                .await;
                match result {
                    Ok(response) if response.is_success() => {
                        client
                            .inner
                            .cache
                            .put_by_key(&key, &response.to_cached())
                            .await;
                        debug!("cached response refreshed");
                    }
                    Ok(response) => {
                        debug!(status = response.status.as_u16(), "revalidation not stored")
                    }
                    Err(error) => debug!(%error, "revalidation failed"),
                }
            }
            .instrument(span),
        );
    }

    /// Installs token callbacks and auth settings.
    pub fn configure_auth(&self, callbacks: Arc<dyn AuthCallbacks>, config: AuthConfig) {
        self.inner.auth.configure(callbacks, config);
    }

    /// Removes the token callbacks and forgets the tokens.
    pub fn clear_auth(&self) {
        self.inner.auth.clear();
    }

    /// Replaces the cached tokens.
    pub fn update_auth_tokens(&self, access_token: Option<String>, refresh_token: Option<String>) {
        self.inner.auth.update_tokens(access_token, refresh_token);
    }

    /// Whether an access token is available.
    pub async fn is_authenticated(&self) -> bool {
        self.inner.auth.is_authenticated().await
    }

    /// Current authentication state.
    pub async fn auth_status(&self) -> AuthStatus {
        self.inner.auth.status().await
    }

    /// Last known connectivity.
    pub fn network_status(&self) -> NetworkStatus {
        self.inner.monitor.status()
    }

    /// Connectivity is known to be up.
    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    /// Connectivity is known to be down.
    pub fn is_offline(&self) -> bool {
        self.inner.monitor.is_offline()
    }

    /// Stream of connectivity changes.
    pub fn status_stream(&self) -> BoxStream<'static, NetworkStatus> {
        self.inner.monitor.status_stream()
    }

    /// Re-checks connectivity now.
    pub async fn refresh_network_status(&self) -> NetworkStatus {
        self.inner.monitor.refresh().await
    }

    /// Number of requests waiting for the network.
    pub fn queued_requests_count(&self) -> usize {
        self.inner.network.queued_requests_count()
    }

    /// Rejects every queued request with [`Error::QueueCleared`].
    pub fn clear_queue(&self) -> usize {
        self.inner.network.clear_queue()
    }

    /// Cache counters.
    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Drops every cached response.
    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
    }

    /// Whether the cache storage is open.
    pub fn is_cache_initialized(&self) -> bool {
        self.inner.cache.is_initialized()
    }

    /// Base URL requests are joined to.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The response cache.
    pub fn cache(&self) -> &SharedCache {
        &self.inner.cache
    }

    /// The token coordinator.
    pub fn auth(&self) -> &AuthCoordinator {
        &self.inner.auth
    }

    /// The offline queue.
    pub fn network(&self) -> &NetworkCoordinator {
        &self.inner.network
    }

    /// The connectivity monitor.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.inner.monitor
    }

    /// Background revalidation tasks.
    pub fn offload(&self) -> &OffloadManager {
        &self.inner.offload
    }
}
