use thiserror::Error;

/// Result alias for [`Storage`](crate::Storage) operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`Storage`](crate::Storage) implementation.
///
/// These never escape [`ResponseCache`](crate::ResponseCache); the cache logs
/// them and behaves as if the entry was absent.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An operation ran before [`Storage::open`](crate::Storage::open) succeeded.
    #[error("storage is not open")]
    NotOpen,
    /// Internal store error, state or computation error.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// Filesystem error while opening or accessing the store.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// SQLite error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Wraps any error as [`StorageError::Internal`].
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(error))
    }
}
