//! Metrics declaration for the client pipeline.
//!
//! Every recorder is a no-op when the `metrics` feature is disabled.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Auth metrics

    /// Track number of token refresh cycles.
    pub static ref AUTH_REFRESH_TOTAL: &'static str = {
        metrics::describe_counter!(
            "waypoint_auth_refresh_total",
            "Total number of token refresh cycles, labelled by outcome."
        );
        "waypoint_auth_refresh_total"
    };
    /// Track number of logout callbacks fired.
    pub static ref AUTH_LOGOUT_TOTAL: &'static str = {
        metrics::describe_counter!(
            "waypoint_auth_logout_total",
            "Total number of logout callbacks fired."
        );
        "waypoint_auth_logout_total"
    };

    // Connectivity metrics

    /// Track connectivity transitions.
    pub static ref CONNECTIVITY_TRANSITIONS: &'static str = {
        metrics::describe_counter!(
            "waypoint_connectivity_transitions_total",
            "Total number of connectivity status changes, labelled by new status."
        );
        "waypoint_connectivity_transitions_total"
    };

    // Offline queue metrics

    /// Track number of requests put in the offline queue.
    pub static ref OFFLINE_QUEUED_TOTAL: &'static str = {
        metrics::describe_counter!(
            "waypoint_offline_queued_total",
            "Total number of requests queued while offline."
        );
        "waypoint_offline_queued_total"
    };
    /// Track how queued requests were resolved.
    pub static ref OFFLINE_RESOLVED_TOTAL: &'static str = {
        metrics::describe_counter!(
            "waypoint_offline_resolved_total",
            "Total number of queued requests resolved, labelled by outcome."
        );
        "waypoint_offline_resolved_total"
    };
    /// Track number of offline reads answered from the cache.
    pub static ref OFFLINE_CACHE_HITS: &'static str = {
        metrics::describe_counter!(
            "waypoint_offline_cache_hits_total",
            "Total number of offline requests answered from the response cache."
        );
        "waypoint_offline_cache_hits_total"
    };

    // Offload manager metrics

    /// Track number of offload tasks spawned.
    pub static ref OFFLOAD_TASKS_SPAWNED: &'static str = {
        metrics::describe_counter!(
            "waypoint_offload_tasks_spawned_total",
            "Total number of background tasks spawned."
        );
        "waypoint_offload_tasks_spawned_total"
    };
    /// Track number of offload tasks deduplicated (skipped).
    pub static ref OFFLOAD_TASKS_DEDUPLICATED: &'static str = {
        metrics::describe_counter!(
            "waypoint_offload_tasks_deduplicated_total",
            "Total number of background tasks skipped because one was already in flight."
        );
        "waypoint_offload_tasks_deduplicated_total"
    };
    /// Track number of offload tasks that timed out.
    pub static ref OFFLOAD_TASKS_TIMEOUT: &'static str = {
        metrics::describe_counter!(
            "waypoint_offload_tasks_timeout_total",
            "Total number of background tasks cancelled by their timeout."
        );
        "waypoint_offload_tasks_timeout_total"
    };
    /// Histogram of offload task duration.
    pub static ref OFFLOAD_TASK_DURATION: &'static str = {
        metrics::describe_histogram!(
            "waypoint_offload_task_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of background tasks in seconds."
        );
        "waypoint_offload_task_duration_seconds"
    };
}

/// Records the outcome of a refresh cycle (`"refreshed"`, `"reused"`, `"failed"`).
#[cfg(feature = "metrics")]
#[inline]
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!(*AUTH_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

/// Records a fired logout callback.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_logout() {
    metrics::counter!(*AUTH_LOGOUT_TOTAL).increment(1);
}

/// Records a connectivity transition to `status`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_transition(status: &'static str) {
    metrics::counter!(*CONNECTIVITY_TRANSITIONS, "status" => status).increment(1);
}

/// Records a request entering the offline queue.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_queued() {
    metrics::counter!(*OFFLINE_QUEUED_TOTAL).increment(1);
}

/// Records how a queued request was resolved.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_resolved(outcome: &'static str) {
    metrics::counter!(*OFFLINE_RESOLVED_TOTAL, "outcome" => outcome).increment(1);
}

/// Records an offline read served from the cache.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offline_cache_hit() {
    metrics::counter!(*OFFLINE_CACHE_HITS).increment(1);
}

/// Records a spawned background task of `kind`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_spawned(kind: &str) {
    metrics::counter!(*OFFLOAD_TASKS_SPAWNED, "kind" => kind.to_string()).increment(1);
}

/// Records a deduplicated background task of `kind`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_deduplicated(kind: &str) {
    metrics::counter!(*OFFLOAD_TASKS_DEDUPLICATED, "kind" => kind.to_string()).increment(1);
}

/// Records a finished background task.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_finished(kind: &str, elapsed: std::time::Duration, timed_out: bool) {
    if timed_out {
        metrics::counter!(*OFFLOAD_TASKS_TIMEOUT, "kind" => kind.to_string()).increment(1);
    }
    metrics::histogram!(*OFFLOAD_TASK_DURATION, "kind" => kind.to_string())
        .record(elapsed.as_secs_f64());
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_refresh(_outcome: &'static str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_logout() {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_transition(_status: &'static str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_queued() {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_resolved(_outcome: &'static str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offline_cache_hit() {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_spawned(_kind: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_deduplicated(_kind: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_finished(_kind: &str, _elapsed: std::time::Duration, _timed_out: bool) {}
