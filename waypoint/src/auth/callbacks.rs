use async_trait::async_trait;

use crate::CallbackError;

/// Host hooks used by the auth coordinator.
///
/// Every method has a no-op default, so an implementation only overrides
/// what it needs. A typical implementation reads tokens from secure storage
/// and calls the backend's refresh endpoint.
///
/// ```
/// use async_trait::async_trait;
/// use waypoint::CallbackError;
/// use waypoint::auth::AuthCallbacks;
///
/// struct Session;
///
/// #[async_trait]
/// impl AuthCallbacks for Session {
///     async fn refresh_token(
///         &self,
///         refresh_token: Option<String>,
///     ) -> Result<Option<String>, CallbackError> {
///         let _ = refresh_token;
///         Ok(Some("fresh-token".to_owned()))
///     }
/// }
/// ```
#[async_trait]
pub trait AuthCallbacks: Send + Sync {
    /// Access token to use when the session holds none.
    ///
    /// Only consulted while the session is empty. A token set through
    /// [`AuthCoordinator::update_tokens`](super::AuthCoordinator::update_tokens)
    /// or obtained by a refresh shadows this one until logout or until the
    /// session is cleared.
    async fn get_token(&self) -> Option<String> {
        None
    }

    /// Exchanges `refresh_token` for a new access token.
    ///
    /// `Ok(None)` or an empty token counts as a failed attempt.
    async fn refresh_token(
        &self,
        refresh_token: Option<String>,
    ) -> Result<Option<String>, CallbackError> {
        let _ = refresh_token;
        Ok(None)
    }

    /// Called after a successful refresh. Errors are logged and ignored.
    async fn on_token_refreshed(&self, token: &str) -> Result<(), CallbackError> {
        let _ = token;
        Ok(())
    }

    /// Called when the session is abandoned after a failed refresh.
    async fn on_logout(&self) -> Result<(), CallbackError> {
        Ok(())
    }
}
