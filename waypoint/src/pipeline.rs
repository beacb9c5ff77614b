//! Named pipeline stages.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, debug_span, warn};

/// Stages a [`Client`](crate::Client) can assemble, in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    /// [`LoggingStage`].
    Logging,
    /// [`NetworkStage`](crate::network::NetworkStage).
    Network,
    /// [`AuthStage`](crate::auth::AuthStage).
    Auth,
}

impl StageName {
    /// Default order: logging, network, auth.
    pub const DEFAULT_ORDER: [StageName; 3] = [Self::Logging, Self::Network, Self::Auth];

    /// Lowercase name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logging => "logging",
            Self::Network => "network",
            Self::Auth => "auth",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks that every stage appears at most once.
pub(crate) fn validate(stages: &[StageName]) -> crate::Result<()> {
    for (index, stage) in stages.iter().enumerate() {
        if stages[..index].contains(stage) {
            return Err(crate::Error::Config(format!(
                "stage `{stage}` appears more than once"
            )));
        }
    }
    Ok(())
}

/// Middleware tracing every request with its status and duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStage;

#[async_trait]
impl Middleware for LoggingStage {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let span = debug_span!("http_request", method = %req.method(), url = %req.url());
        let start = Instant::now();
        let result = next.run(req, extensions).instrument(span.clone()).await;
        let elapsed_ms = start.elapsed().as_millis();

        match &result {
            Ok(response) => debug!(
                parent: &span,
                status = response.status().as_u16(),
                elapsed_ms,
                "request finished"
            ),
            Err(error) => warn!(parent: &span, %error, elapsed_ms, "request failed"),
        }
        result
    }
}
