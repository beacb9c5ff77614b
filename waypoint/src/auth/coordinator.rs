//! Single-flight token refresh.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use http::{HeaderName, HeaderValue};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::metrics;
use crate::{Error, Result};

use super::session::AuthSession;
use super::{AuthCallbacks, AuthConfig, AuthStatus};

/// Outcome handed to every waiter of a refresh cycle.
type RefreshOutcome = std::result::Result<String, RefreshFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshFailure {
    /// No token was ever available, so there was nothing to refresh.
    NoToken,
    /// Every refresh attempt failed.
    Exhausted,
}

struct PendingAuthRequest {
    id: u64,
    enqueued_at: Instant,
    slot: oneshot::Sender<RefreshOutcome>,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    waiters: VecDeque<PendingAuthRequest>,
    next_id: u64,
}

struct Inner {
    callbacks: RwLock<Option<Arc<dyn AuthCallbacks>>>,
    config: RwLock<AuthConfig>,
    session: Mutex<AuthSession>,
    refresh: Mutex<RefreshState>,
}

/// Coordinates bearer tokens for every request of a client.
///
/// The coordinator keeps the session tokens, decorates outgoing requests and
/// turns any number of concurrent `401` responses into a single call to
/// [`AuthCallbacks::refresh_token`]. Requests that fail while a refresh is
/// running wait for its outcome and are then replayed with the new token.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct AuthCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AuthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCoordinator")
            .field("configured", &self.is_configured())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Default for AuthCoordinator {
    fn default() -> Self {
        Self::new(AuthConfig::default())
    }
}

impl AuthCoordinator {
    /// Creates an unconfigured coordinator. Requests pass through untouched
    /// until [`configure`](Self::configure) or [`update_tokens`](Self::update_tokens).
    pub fn new(config: AuthConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                callbacks: RwLock::new(None),
                config: RwLock::new(config),
                session: Mutex::new(AuthSession::default()),
                refresh: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// Installs callbacks and settings. Session tokens are kept.
    pub fn configure(&self, callbacks: Arc<dyn AuthCallbacks>, config: AuthConfig) {
        *self
            .inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callbacks);
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
        debug!("auth configured");
    }

    /// Removes callbacks and session tokens.
    pub fn clear(&self) {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.lock_session().clear_tokens();
        debug!("auth cleared");
    }

    /// Replaces the session tokens.
    pub fn update_tokens(&self, access_token: Option<String>, refresh_token: Option<String>) {
        let mut session = self.lock_session();
        session.access_token = access_token;
        session.refresh_token = refresh_token;
    }

    /// Whether a token is available, from the session or [`AuthCallbacks::get_token`].
    pub async fn is_authenticated(&self) -> bool {
        self.current_token().await.is_some()
    }

    /// Current auth status.
    pub async fn status(&self) -> AuthStatus {
        if self.lock_refresh().refreshing {
            return AuthStatus::Refreshing;
        }
        if !self.is_configured() && self.lock_session().access_token.is_none() {
            return AuthStatus::Unconfigured;
        }
        if self.is_authenticated().await {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        }
    }

    /// Number of requests waiting for the running refresh.
    pub fn pending_count(&self) -> usize {
        self.lock_refresh().waiters.len()
    }

    /// Whether callbacks are installed, i.e. whether `401`s are handled.
    pub fn is_configured(&self) -> bool {
        self.callbacks().is_some()
    }

    /// Active settings.
    pub fn config(&self) -> AuthConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Session token, falling back to [`AuthCallbacks::get_token`].
    ///
    /// The session token always wins, so a token returned by `get_token` is
    /// ignored after a refresh until the session is cleared again.
    pub async fn current_token(&self) -> Option<String> {
        let token = self.lock_session().access_token.clone();
        if token.is_some() {
            return token;
        }
        match self.callbacks() {
            Some(callbacks) => callbacks.get_token().await.filter(|t| !t.is_empty()),
            None => None,
        }
    }

    /// Sets the auth header of `request` to `token`.
    pub fn authorize(&self, request: &mut reqwest::Request, token: &str) -> Result<()> {
        let config = self.config();
        let name = HeaderName::from_bytes(config.header_name.as_bytes())
            .map_err(|error| Error::Config(format!("invalid auth header name: {error}")))?;
        let mut value = HeaderValue::from_str(&format!("{}{token}", config.token_prefix))
            .map_err(|error| Error::Config(format!("invalid auth header value: {error}")))?;
        value.set_sensitive(true);
        request.headers_mut().insert(name, value);
        Ok(())
    }

    /// Waits for a valid token after a request carrying `failed_token` got a `401`.
    ///
    /// The first caller starts a refresh in a background task; callers that
    /// arrive while it runs join the same cycle. Returns the token to replay
    /// with, or [`Error::Unauthorized`] if the refresh failed.
    pub async fn handle_unauthorized(&self, failed_token: Option<String>) -> Result<String> {
        let (receiver, start) = {
            let mut state = self.lock_refresh();
            let (slot, receiver) = oneshot::channel();
            let id = state.next_id;
            state.next_id += 1;
            state.waiters.push_back(PendingAuthRequest {
                id,
                enqueued_at: Instant::now(),
                slot,
            });
            let start = !state.refreshing;
            state.refreshing = true;
            debug!(waiter = id, start, "request waiting for token refresh");
            (receiver, start)
        };

        if start {
            let coordinator = self.clone();
            tokio::spawn(
                async move { coordinator.run_refresh(failed_token).await }
                    .instrument(info_span!("token_refresh")),
            );
        }

        match receiver.await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(_)) | Err(_) => Err(Error::Unauthorized { status: 401 }),
        }
    }

    async fn run_refresh(&self, failed_token: Option<String>) {
        let outcome = self.refresh(failed_token).await;

        match &outcome {
            Ok(token) => {
                self.lock_session().access_token = Some(token.clone());
                if let Some(callbacks) = self.callbacks()
                    && let Err(error) = callbacks.on_token_refreshed(token).await
                {
                    warn!(%error, "on_token_refreshed callback failed");
                }
            }
            Err(failure) => {
                warn!(?failure, "token refresh failed");
                metrics::record_refresh("failed");
                self.logout().await;
            }
        }

        let waiters = {
            let mut state = self.lock_refresh();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };
        debug!(waiters = waiters.len(), "resolving refresh waiters");
        for waiter in waiters {
            debug!(
                waiter = waiter.id,
                waited_ms = waiter.enqueued_at.elapsed().as_millis(),
                "refresh waiter resolved"
            );
            // receiver may have been dropped by a cancelled caller
            let _ = waiter.slot.send(outcome.clone());
        }
    }

    async fn refresh(&self, failed_token: Option<String>) -> RefreshOutcome {
        let Some(current) = self.current_token().await else {
            debug!("no token available, skipping refresh");
            return Err(RefreshFailure::NoToken);
        };
        if failed_token.as_deref() != Some(current.as_str()) {
            debug!("token changed since the request was sent, reusing it");
            metrics::record_refresh("reused");
            return Ok(current);
        }

        let Some(callbacks) = self.callbacks() else {
            return Err(RefreshFailure::Exhausted);
        };
        let config = self.config();
        let refresh_token = self.lock_session().refresh_token.clone();
        let attempts = config.max_retry_attempts.max(1);

        for attempt in 1..=attempts {
            match callbacks.refresh_token(refresh_token.clone()).await {
                Ok(Some(token)) if !token.is_empty() => {
                    info!(attempt, "token refreshed");
                    metrics::record_refresh("refreshed");
                    return Ok(token);
                }
                Ok(_) => debug!(attempt, "refresh returned no token"),
                Err(error) => warn!(attempt, %error, "refresh attempt failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(config.retry_delay).await;
            }
        }
        Err(RefreshFailure::Exhausted)
    }

    /// Clears the session and fires [`AuthCallbacks::on_logout`], at most once per cooldown.
    async fn logout(&self) {
        let cooldown = self.config().logout_cooldown;
        let fire = {
            let mut session = self.lock_session();
            session.clear_tokens();
            session.begin_logout(Instant::now(), cooldown)
        };
        if !fire {
            debug!("logout skipped, still cooling down");
            return;
        }

        info!("logging out after failed token refresh");
        metrics::record_logout();
        if let Some(callbacks) = self.callbacks()
            && let Err(error) = callbacks.on_logout().await
        {
            warn!(%error, "on_logout callback failed");
        }
    }

    fn callbacks(&self) -> Option<Arc<dyn AuthCallbacks>> {
        self.inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, AuthSession> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_refresh(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.inner
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
