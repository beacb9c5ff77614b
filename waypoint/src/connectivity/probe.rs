use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

/// Confirms that an endpoint is reachable.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns `true` if `url` answered with a 2xx status within `timeout`.
    ///
    /// Implementations must not fail: any error counts as unreachable.
    async fn probe(&self, url: &Url, timeout: Duration) -> bool;
}

/// Probe issuing a plain `GET` through reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Creates a probe using `client`.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self, url: &Url, timeout: Duration) -> bool {
        match self.client.get(url.clone()).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                debug!(%url, %error, "reachability probe failed");
                false
            }
        }
    }
}
