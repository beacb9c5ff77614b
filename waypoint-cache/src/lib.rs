#![warn(missing_docs)]
//! # waypoint-cache
//!
//! Response cache for the `waypoint` HTTP client layer.
//!
//! The cache maps a request `(path, query)` pair to a stored payload and
//! enforces two bounds:
//!
//! - **TTL** - an entry older than the configured time-to-live is never
//!   returned. Expiry is evaluated lazily on read; an optional sweep on
//!   initialization drops entries that expired while the process was down.
//! - **Size** - after every write the cache holds at most `max_entries`
//!   entries. The oldest entries by insertion time are evicted first.
//!
//! Storage is pluggable through the [`Storage`] trait. Two stores ship with
//! the crate:
//!
//! | Store | Feature | Use case |
//! |-------|---------|----------|
//! | [`MemoryStorage`] | - | In-process, lost on restart |
//! | `SqliteStorage` | `sqlite` | Persistent, single file |
//!
//! Cache failures never reach the caller: storage errors and corrupt entries
//! degrade to a cache miss and are reported through `tracing`.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use waypoint_cache::ResponseCache;
//!
//! let cache = ResponseCache::builder().max_entries(50).build();
//! cache.put("/posts", &[("page", "1")], &"payload").await;
//!
//! let hit: Option<String> = cache.get("/posts", &[("page", "1")]).await;
//! assert_eq!(hit.as_deref(), Some("payload"));
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - enable [`SqliteStorage`](crate::sqlite::SqliteStorage)
//! - `metrics` - record hit/miss/eviction counters with the `metrics` crate

mod cache;
mod clock;
mod config;
mod envelope;
mod error;
mod key;
mod memory;
pub mod metrics;
mod storage;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::{CacheStats, ResponseCache, ResponseCacheBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use envelope::CacheEnvelope;
pub use error::{StorageError, StorageResult};
pub use key::CacheKey;
pub use memory::MemoryStorage;
pub use storage::{DeleteStatus, Storage};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
