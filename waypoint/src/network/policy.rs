use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Defaults of the network stage and the offline queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Apply offline handling at all.
    pub handle_network: bool,
    /// Re-check connectivity and retry after a connect or timeout error.
    pub auto_retry: bool,
    /// Retries after a connectivity error while still online.
    pub max_retries: u32,
    /// Pause before each retry (e.g. "500ms").
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Fail non-idempotent requests with [`Error::Offline`](crate::Error::Offline)
    /// instead of answering with the offline response.
    pub throw_on_offline: bool,
    /// Longest time a queued request waits for the network (e.g. "2m").
    #[serde(with = "humantime_serde")]
    pub queue_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            handle_network: true,
            auto_retry: true,
            max_retries: 1,
            retry_delay: Duration::from_millis(500),
            throw_on_offline: false,
            queue_timeout: Duration::from_secs(120),
        }
    }
}

/// Per-request network behaviour, carried in the request extensions.
///
/// Requests without this extension use the [`NetworkConfig`] defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPolicy {
    /// Apply offline handling to this request.
    pub handle_network: bool,
    /// Retry after a connectivity error.
    pub auto_retry: bool,
    /// Retries after a connectivity error while still online.
    pub max_retries: u32,
    /// Fail a non-idempotent request when offline.
    pub throw_on_offline: bool,
    /// Queue a non-idempotent request when offline. `GET` and `HEAD` are
    /// always queued.
    pub queue_when_offline: bool,
}

impl From<&NetworkConfig> for NetworkPolicy {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            handle_network: config.handle_network,
            auto_retry: config.auto_retry,
            max_retries: config.max_retries,
            throw_on_offline: config.throw_on_offline,
            queue_when_offline: false,
        }
    }
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}
