use std::time::Duration;

use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderValue};

use crate::CancelToken;
use crate::network::NetworkPolicy;

/// Per-call overrides of the client's [`NetworkConfig`](crate::network::NetworkConfig).
///
/// `None` keeps the configured value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkOverrides {
    /// Override of `handle_network`.
    pub handle_network: Option<bool>,
    /// Override of `auto_retry`.
    pub auto_retry: Option<bool>,
    /// Override of `max_retries`.
    pub max_retries: Option<u32>,
    /// Override of `throw_on_offline`.
    pub throw_on_offline: Option<bool>,
    /// Queue a non-idempotent request while offline.
    pub queue_when_offline: Option<bool>,
}

impl NetworkOverrides {
    pub(crate) fn apply(&self, mut policy: NetworkPolicy) -> NetworkPolicy {
        if let Some(value) = self.handle_network {
            policy.handle_network = value;
        }
        if let Some(value) = self.auto_retry {
            policy.auto_retry = value;
        }
        if let Some(value) = self.max_retries {
            policy.max_retries = value;
        }
        if let Some(value) = self.throw_on_offline {
            policy.throw_on_offline = value;
        }
        if let Some(value) = self.queue_when_offline {
            policy.queue_when_offline = value;
        }
        policy
    }
}

/// Options of a single [`Client`](crate::Client) call.
///
/// ```
/// use std::time::Duration;
/// use waypoint::RequestOptions;
///
/// let options = RequestOptions::new()
///     .query("page", "2")
///     .use_cache(true)
///     .timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query parameters appended to the URL. Also part of the cache key.
    pub query: Vec<(String, String)>,
    /// Extra headers.
    pub headers: HeaderMap,
    /// Token aborting the call, or dropping it from the offline queue.
    pub cancel: Option<CancelToken>,
    /// Pass the serialized body through the client's
    /// [`BodyEncryptor`](crate::BodyEncryptor).
    pub encrypt_body: bool,
    /// Read-through caching. Only applies to `GET`.
    pub use_cache: bool,
    /// Timeout of this call, overriding the client default.
    pub timeout: Option<Duration>,
    /// Offline behaviour overrides.
    pub network: NetworkOverrides,
    /// Marks a call to the token refresh endpoint; its `401` is not refreshed.
    pub refresh_call: bool,
}

impl RequestOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a header.
    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attaches a cancellation token.
    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Enables body encryption.
    pub fn encrypt_body(mut self, enabled: bool) -> Self {
        self.encrypt_body = enabled;
        self
    }

    /// Enables read-through caching.
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    /// Sets the call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables or disables offline handling for this call.
    pub fn handle_network(mut self, enabled: bool) -> Self {
        self.network.handle_network = Some(enabled);
        self
    }

    /// Enables or disables retry after connectivity errors.
    pub fn auto_retry(mut self, enabled: bool) -> Self {
        self.network.auto_retry = Some(enabled);
        self
    }

    /// Sets the number of retries after connectivity errors.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.network.max_retries = Some(retries);
        self
    }

    /// Fail with [`Error::Offline`](crate::Error::Offline) instead of
    /// answering with the offline response.
    pub fn throw_on_offline(mut self, enabled: bool) -> Self {
        self.network.throw_on_offline = Some(enabled);
        self
    }

    /// Queue this call while offline even if it is not a `GET` or `HEAD`.
    pub fn queue_when_offline(mut self, enabled: bool) -> Self {
        self.network.queue_when_offline = Some(enabled);
        self
    }

    /// Marks this call as the token refresh request.
    pub fn refresh_call(mut self) -> Self {
        self.refresh_call = true;
        self
    }
}
