//! Bearer-token authentication with single-flight refresh.
//!
//! [`AuthStage`] is the middleware; [`AuthCoordinator`] owns the session and
//! the refresh cycle; [`AuthCallbacks`] is how the host application provides
//! and refreshes tokens.

mod callbacks;
mod coordinator;
mod session;
mod stage;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use callbacks::AuthCallbacks;
pub use coordinator::AuthCoordinator;
pub use stage::AuthStage;

/// Token header and refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the token.
    pub header_name: String,
    /// Prefix written before the token, separator included.
    pub token_prefix: String,
    /// Number of `refresh_token` calls per refresh cycle.
    pub max_retry_attempts: u32,
    /// Pause between two refresh attempts (e.g. "1s").
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Minimum time between two logout callbacks (e.g. "5s").
    #[serde(with = "humantime_serde")]
    pub logout_cooldown: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header_name: "Authorization".to_owned(),
            token_prefix: "Bearer ".to_owned(),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            logout_cooldown: Duration::from_secs(5),
        }
    }
}

/// Auth state reported by [`AuthCoordinator::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    /// No callbacks and no token.
    Unconfigured,
    /// A token is available.
    Authenticated,
    /// Callbacks are configured but there is no token.
    Unauthenticated,
    /// A refresh cycle is running.
    Refreshing,
}

/// Request extension marking a call to the refresh endpoint itself.
///
/// A `401` on such a request is returned to the caller instead of starting
/// another refresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshCall;

/// Request extension set on a request replayed after a refresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct Replayed;
