use async_trait::async_trait;
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use tracing::debug;

use crate::connectivity::NetworkStatus;
use crate::error::is_connectivity_error;

use super::{NetworkCoordinator, NetworkPolicy};

/// Middleware applying offline handling.
///
/// While the monitor reports `offline` the request never reaches the
/// transport: it is answered from the cache, queued, rejected or answered with
/// the offline response, as described in
/// [`NetworkCoordinator::respond_offline`]. While `online` or `unknown` the
/// request passes through. With `auto_retry`, a connect or timeout error
/// triggers a connectivity re-check; if the device turned out to be offline
/// the request takes the offline path, otherwise it is retried up to
/// `max_retries` times.
///
/// The per-request [`NetworkPolicy`] is read from the request extensions.
#[derive(Debug, Clone)]
pub struct NetworkStage {
    coordinator: NetworkCoordinator,
}

impl NetworkStage {
    /// Create a stage backed by `coordinator`.
    pub fn new(coordinator: NetworkCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Middleware for NetworkStage {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let policy = extensions
            .get::<NetworkPolicy>()
            .copied()
            .unwrap_or_else(|| self.coordinator.default_policy());
        if !policy.handle_network {
            return next.run(req, extensions).await;
        }

        if self.coordinator.monitor().is_offline() {
            return self
                .coordinator
                .respond_offline(req, extensions, &policy)
                .await
                .map_err(crate::Error::into_middleware);
        }

        let mut req = req;
        let mut retries = 0;
        loop {
            let retry = if policy.auto_retry {
                req.try_clone()
            } else {
                None
            };

            let error = match next.clone().run(req, extensions).await {
                Err(reqwest_middleware::Error::Reqwest(error)) if is_connectivity_error(&error) => {
                    error
                }
                other => return other,
            };
            let Some(retry) = retry else {
                return Err(error.into());
            };

            let status = self.coordinator.monitor().refresh().await;
            if status == NetworkStatus::Offline {
                debug!(url = %retry.url(), %error, "connection lost, taking offline path");
                return self
                    .coordinator
                    .respond_offline(retry, extensions, &policy)
                    .await
                    .map_err(crate::Error::into_middleware);
            }
            if retries >= policy.max_retries {
                return Err(error.into());
            }

            retries += 1;
            debug!(url = %retry.url(), %error, retries, "retrying after connectivity error");
            tokio::time::sleep(self.coordinator.config().retry_delay).await;
            req = retry;
        }
    }
}
