//! Background task registry.
//!
//! The [`Client`](crate::Client) returns cached responses immediately and
//! refreshes them in the background. Those refreshes run through an
//! [`OffloadManager`], which deduplicates them per cache key and aborts them
//! on shutdown.
//!
//! ```
//! use waypoint::CacheKey;
//! use waypoint::offload::{OffloadConfig, OffloadManager};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = OffloadManager::new(OffloadConfig::default());
//! let spawned = manager.spawn_with_key(CacheKey::from_path("/posts"), async {
//!     // refetch and store
//! });
//! assert!(spawned);
//! manager.wait_all().await;
//! # }
//! ```

mod manager;
mod policy;

pub use manager::{OffloadHandle, OffloadKey, OffloadManager};
pub use policy::{OffloadConfig, OffloadConfigBuilder, TimeoutPolicy};
