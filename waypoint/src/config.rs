//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use waypoint_cache::CacheConfig;

use crate::auth::AuthConfig;
use crate::connectivity::ConnectivityConfig;
use crate::network::NetworkConfig;
use crate::pipeline::StageName;

/// Error raised while loading a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The YAML document is invalid.
    #[error("invalid configuration: {0}")]
    Yaml(String),
    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for crate::Error {
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

/// Settings of background cache revalidation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RevalidationConfig {
    /// Refresh a cached response in the background after serving it.
    pub enabled: bool,
    /// Abort a revalidation that runs longer than this (e.g. "30s").
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Full configuration of a [`Client`](crate::Client).
///
/// Every section is optional in YAML; missing fields take their defaults.
///
/// ```
/// use std::time::Duration;
/// use waypoint::ClientConfig;
///
/// let config = ClientConfig::from_yaml(
///     r#"
/// cache:
///   ttl: 10m
///   max_entries: 500
/// auth:
///   token_prefix: "Token "
/// network:
///   queue_timeout: 1m
/// "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.cache.ttl, Duration::from_secs(600));
/// assert_eq!(config.auth.token_prefix, "Token ");
/// assert_eq!(config.auth.header_name, "Authorization");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Response cache bounds.
    pub cache: CacheConfig,
    /// Connectivity checks.
    pub connectivity: ConnectivityConfig,
    /// Token header and refresh.
    pub auth: AuthConfig,
    /// Offline handling and queueing.
    pub network: NetworkConfig,
    /// Background revalidation of cached responses.
    pub revalidation: RevalidationConfig,
    /// Default per-request timeout (e.g. "30s").
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Pipeline stages in request order.
    pub stages: Vec<StageName>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            connectivity: ConnectivityConfig::default(),
            auth: AuthConfig::default(),
            network: NetworkConfig::default(),
            revalidation: RevalidationConfig::default(),
            timeout: None,
            stages: StageName::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl ClientConfig {
    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_saphyr::from_str(yaml).map_err(|error| ConfigError::Yaml(error.to_string()))
    }

    /// Reads and parses a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }
}
