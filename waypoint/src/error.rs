//! Error types for the waypoint client.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by user-supplied callbacks ([`AuthCallbacks`](crate::auth::AuthCallbacks),
/// [`BodyEncryptor`](crate::BodyEncryptor)).
#[derive(Debug, Error)]
#[error(transparent)]
pub struct CallbackError(Box<dyn std::error::Error + Send + Sync>);

impl CallbackError {
    /// Wraps any error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(error))
    }

    /// Creates an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self(message.into())
    }
}

/// Errors surfaced to callers of the [`Client`](crate::Client).
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure reported by reqwest.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Error raised by a middleware that is not part of this crate.
    #[error("middleware error: {0}")]
    Middleware(reqwest_middleware::Error),
    /// The server rejected the credentials and the token could not be refreshed.
    #[error("unauthorized (status {status})")]
    Unauthorized {
        /// Status of the rejected response.
        status: u16,
    },
    /// The device is offline and the request was configured to fail fast.
    #[error("no network connection")]
    Offline,
    /// A queued request was not replayed within the queue timeout.
    #[error("timed out waiting for network connection")]
    OfflineTimeout,
    /// The request was cancelled by its caller or by shutdown.
    #[error("request cancelled")]
    Cancelled,
    /// The offline queue was cleared before the request could be replayed.
    #[error("offline queue cleared")]
    QueueCleared,
    /// The client has been shut down.
    #[error("client is closed")]
    Closed,
    /// The body encryptor failed.
    #[error("body encryption failed: {0}")]
    Encryption(#[source] CallbackError),
    /// Request or response body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Filesystem error, e.g. while writing a download.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The request URL could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps this error so it can cross a `reqwest_middleware` boundary.
    ///
    /// [`From<reqwest_middleware::Error>`] recovers the original variant.
    pub fn into_middleware(self) -> reqwest_middleware::Error {
        reqwest_middleware::Error::middleware(self)
    }

    /// Returns `true` for transport failures that suggest the network is gone.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Transport(error) => is_connectivity_error(error),
            Self::Offline | Self::OfflineTimeout => true,
            _ => false,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(error: reqwest_middleware::Error) -> Self {
        match error {
            reqwest_middleware::Error::Reqwest(error) => Self::Transport(error),
            reqwest_middleware::Error::Middleware(error) => match error.downcast::<Error>() {
                Ok(error) => error,
                Err(other) => Self::Middleware(reqwest_middleware::Error::Middleware(other)),
            },
        }
    }
}

pub(crate) fn is_connectivity_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}
