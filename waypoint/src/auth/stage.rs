use async_trait::async_trait;
use http::{Extensions, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use tracing::debug;

use super::{AuthCoordinator, RefreshCall, Replayed};

/// Middleware attaching the bearer token and recovering from `401`s.
///
/// Before sending, the current token is written to the configured header.
/// When the response is `401 Unauthorized` and callbacks are configured, the
/// request waits for the shared refresh cycle of its [`AuthCoordinator`] and
/// is replayed once through the rest of the pipeline with the new token.
///
/// Requests marked with [`RefreshCall`] or [`Replayed`] are never refreshed,
/// and neither are requests whose body cannot be cloned; their `401` is
/// returned as is. When the refresh fails the caller gets
/// [`Error::Unauthorized`](crate::Error::Unauthorized).
#[derive(Debug, Clone)]
pub struct AuthStage {
    coordinator: AuthCoordinator,
}

impl AuthStage {
    /// Create a stage backed by `coordinator`.
    pub fn new(coordinator: AuthCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Middleware for AuthStage {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let token = self.coordinator.current_token().await;
        if let Some(token) = &token {
            self.coordinator
                .authorize(&mut req, token)
                .map_err(crate::Error::into_middleware)?;
        }

        let refreshable = self.coordinator.is_configured()
            && extensions.get::<RefreshCall>().is_none()
            && extensions.get::<Replayed>().is_none();
        let replay = if refreshable { req.try_clone() } else { None };

        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(mut replay) = replay else {
            debug!(url = %response.url(), "401 not eligible for token refresh");
            return Ok(response);
        };

        let token = self
            .coordinator
            .handle_unauthorized(token)
            .await
            .map_err(crate::Error::into_middleware)?;
        self.coordinator
            .authorize(&mut replay, &token)
            .map_err(crate::Error::into_middleware)?;
        extensions.insert(Replayed);

        debug!(url = %replay.url(), "replaying request with refreshed token");
        next.run(replay, extensions).await
    }
}
