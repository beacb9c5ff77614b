//! Metrics declaration for the response cache.
//!
//! With the `metrics` feature disabled every recorder below is an empty
//! inline function.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of cache hits.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "waypoint_cache_hit_total",
            "Total number of response cache hits."
        );
        "waypoint_cache_hit_total"
    };
    /// Track number of cache misses, expired and corrupt entries included.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "waypoint_cache_miss_total",
            "Total number of response cache misses."
        );
        "waypoint_cache_miss_total"
    };
    /// Track number of entries evicted by the size bound.
    pub static ref CACHE_EVICTION_COUNTER: &'static str = {
        metrics::describe_counter!(
            "waypoint_cache_evictions_total",
            "Total number of entries evicted to respect max_entries."
        );
        "waypoint_cache_evictions_total"
    };
    /// Track number of absorbed storage errors.
    pub static ref CACHE_STORAGE_ERRORS: &'static str = {
        metrics::describe_counter!(
            "waypoint_cache_storage_errors_total",
            "Total number of storage errors degraded to a miss or no-op."
        );
        "waypoint_cache_storage_errors_total"
    };
}

/// Records a cache hit for `storage`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_hit(storage: &str) {
    metrics::counter!(*CACHE_HIT_COUNTER, "storage" => storage.to_string()).increment(1);
}

/// Records a cache miss for `storage`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_miss(storage: &str) {
    metrics::counter!(*CACHE_MISS_COUNTER, "storage" => storage.to_string()).increment(1);
}

/// Records `count` evictions for `storage`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_evictions(storage: &str, count: u64) {
    metrics::counter!(*CACHE_EVICTION_COUNTER, "storage" => storage.to_string()).increment(count);
}

/// Records an absorbed storage error for `storage`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_storage_error(storage: &str) {
    metrics::counter!(*CACHE_STORAGE_ERRORS, "storage" => storage.to_string()).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_hit(_storage: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_miss(_storage: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_evictions(_storage: &str, _count: u64) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_storage_error(_storage: &str) {}
