//! SQLite-backed persistent storage.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{Connection, OptionalExtension, params};

use crate::{DeleteStatus, Storage, StorageError, StorageResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
"#;

/// Persistent key-value store in a single SQLite file.
///
/// Every call runs on the blocking thread pool. The connection is opened by
/// [`Storage::open`], so constructing the store never touches the disk.
///
/// ```no_run
/// use waypoint_cache::{ResponseCache, SqliteStorage};
///
/// let cache = ResponseCache::builder()
///     .storage(SqliteStorage::new("/var/cache/myapp/responses.db"))
///     .build();
/// ```
///
/// Cloning is cheap. Clones share the same connection.
#[derive(Clone, Debug)]
pub struct SqliteStorage {
    path: Option<PathBuf>,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStorage {
    /// Store persisted at `path`. If `path` is a directory, `cache.db` is
    /// created inside it.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Store kept in a private in-memory database. Data is lost when dropped.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_connection<T, F>(&self, operation: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock().unwrap_or_else(PoisonError::into_inner);
            let conn = guard.as_ref().ok_or(StorageError::NotOpen)?;
            operation(conn)
        })
        .await
        .map_err(StorageError::internal)?
    }
}

fn open_connection(path: Option<&Path>) -> StorageResult<Connection> {
    let conn = match path {
        Some(path) => {
            let mut path = path.to_path_buf();
            if path.is_dir() {
                path.push("cache.db");
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(&path)?
        }
        None => Connection::open_in_memory()?,
    };
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn open(&self) -> StorageResult<()> {
        let connection = self.connection.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = connection.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                *guard = Some(open_connection(path.as_deref())?);
            }
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(StorageError::internal)?
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let key = key.to_owned();
        self.with_connection(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM entries WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value.map(Bytes::from))
        })
        .await
    }

    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        let key = key.to_owned();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
                params![key, &value[..]],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        let key = key.to_owned();
        self.with_connection(move |conn| {
            let deleted = conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
            Ok(if deleted > 0 {
                DeleteStatus::Deleted
            } else {
                DeleteStatus::Missing
            })
        })
        .await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM entries")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM entries", [])?;
            Ok(())
        })
        .await
    }

    fn label(&self) -> &str {
        "sqlite"
    }
}
