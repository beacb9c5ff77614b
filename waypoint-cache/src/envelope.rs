use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored form of a cache entry: the payload and the instant it was written.
///
/// Serialized as JSON `{"data": ..., "timestamp": "<RFC 3339>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
    /// Cached payload.
    pub data: T,
    /// Insertion time, used for both TTL and eviction order.
    pub timestamp: DateTime<Utc>,
}

impl<T> CacheEnvelope<T> {
    /// Wraps `data` stamped with `timestamp`.
    pub fn new(data: T, timestamp: DateTime<Utc>) -> Self {
        Self { data, timestamp }
    }
}

/// Envelope view that skips the payload, for eviction and sweeps.
#[derive(Debug, Deserialize)]
pub(crate) struct EnvelopeHeader {
    pub(crate) timestamp: DateTime<Utc>,
}
