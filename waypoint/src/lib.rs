#![warn(missing_docs)]
//! # waypoint
//!
//! Connectivity-aware HTTP client built on `reqwest` and
//! `reqwest-middleware`.
//!
//! A [`Client`] runs every request through a configurable pipeline of
//! stages:
//!
//! - **logging** - traces method, URL, status and duration.
//! - **network** - consults the [`ConnectivityMonitor`](connectivity::ConnectivityMonitor).
//!   While offline, `GET`/`HEAD` requests are answered from the response
//!   cache or queued and replayed in order once the network returns; other
//!   methods are only queued on request. Connect and timeout errors trigger
//!   a connectivity re-check and a bounded retry.
//! - **auth** - attaches the access token and, on `401`, refreshes it once
//!   for all concurrent callers before replaying the request.
//!
//! On top of the pipeline the client offers read-through caching of `GET`
//! responses with background revalidation, optional body encryption,
//! cancellation and streaming downloads.
//!
//! ```no_run
//! # async fn run() -> waypoint::Result<()> {
//! use std::time::Duration;
//! use waypoint::{Client, ClientConfig, RequestOptions};
//!
//! let config = ClientConfig::from_yaml(
//!     r#"
//! cache:
//!   ttl: 10m
//! network:
//!   queue_timeout: 1m
//! "#,
//! )?;
//! let client = Client::builder("https://api.example.com")
//!     .config(config)
//!     .timeout(Duration::from_secs(20))
//!     .build()?;
//! client.initialize().await;
//!
//! let response = client
//!     .post("/orders", &serde_json::json!({"sku": 42}), RequestOptions::new())
//!     .await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - persistent cache storage (`waypoint_cache::SqliteStorage`)
//! - `metrics` - counters and histograms through the `metrics` crate

pub mod auth;
pub mod cached;
mod cancel;
mod client;
mod config;
pub mod connectivity;
mod error;
pub mod metrics;
pub mod network;
pub mod offload;
mod pipeline;

pub use cached::{CACHE_STATUS_HEADER, CachedResponse};
pub use cancel::CancelToken;
pub use client::{
    ApiResponse, BodyEncryptor, Client, ClientBuilder, Download, IdentityEncryptor,
    NetworkOverrides, PendingReplay, RequestOptions,
};
pub use config::{ClientConfig, ConfigError, RevalidationConfig};
pub use error::{CallbackError, Error, Result};
pub use pipeline::{LoggingStage, StageName};

// Re-export the cache crate for storage and clock types
pub use waypoint_cache;
pub use waypoint_cache::{CacheConfig, CacheKey, CacheStats, MemoryStorage, Storage};
