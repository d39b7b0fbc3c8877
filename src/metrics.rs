//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Leader request volume and failures
//! - Batch fetch/apply throughput
//! - Replication lag in ticks
//! - Transaction tracking
//! - Resync fallbacks
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions (duration, size).
//!
//! # Usage
//!
//! ```rust,no_run
//! use replication_applier::metrics;
//! use std::time::Duration;
//!
//! // After applying a batch
//! metrics::replication_batch_applied("shop", 42, Duration::from_millis(12));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a request issued to the leader.
pub fn replication_leader_request(operation: &str) {
    counter!("replication_leader_requests_total", "operation" => operation.to_string())
        .increment(1);
}

/// Record a failed connection attempt to the leader.
pub fn replication_connect_failure(operation: &str) {
    counter!("replication_connect_failures_total", "operation" => operation.to_string())
        .increment(1);
}

/// Record a fetched batch.
pub fn replication_batch_fetched(database: &str, entries: usize, duration: Duration) {
    counter!("replication_batches_fetched_total", "database" => database.to_string()).increment(1);
    if entries > 0 {
        counter!("replication_entries_fetched_total", "database" => database.to_string())
            .increment(entries as u64);
    }
    histogram!("replication_batch_fetch_duration_seconds", "database" => database.to_string())
        .record(duration.as_secs_f64());
}

/// Record an applied batch.
pub fn replication_batch_applied(database: &str, entries: usize, duration: Duration) {
    counter!("replication_batches_applied_total", "database" => database.to_string()).increment(1);
    if entries > 0 {
        counter!("replication_entries_applied_total", "database" => database.to_string())
            .increment(entries as u64);
    }
    histogram!("replication_batch_apply_duration_seconds", "database" => database.to_string())
        .record(duration.as_secs_f64());
}

/// Record entries skipped by the resume filter.
pub fn replication_entries_skipped(database: &str, count: usize) {
    if count > 0 {
        counter!("replication_entries_skipped_total", "database" => database.to_string())
            .increment(count as u64);
    }
}

/// Record an apply error consumed by the ignore budget.
pub fn replication_apply_error_ignored(database: &str) {
    counter!("replication_apply_errors_ignored_total", "database" => database.to_string())
        .increment(1);
}

/// Gauge for replication lag in ticks (leader head minus last applied).
pub fn replication_lag_ticks(database: &str, lag: u64) {
    gauge!("replication_lag_ticks", "database" => database.to_string()).set(lag as f64);
}

/// Gauge for the number of currently tracked open transactions.
pub fn replication_open_transactions(database: &str, count: usize) {
    gauge!("replication_open_transactions", "database" => database.to_string())
        .set(count as f64);
}

/// Record applier state persisted.
pub fn replication_state_persisted(last_applied_tick: u64) {
    counter!("replication_state_persists_total").increment(1);
    gauge!("replication_last_applied_tick").set(last_applied_tick as f64);
}

/// Record state store SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn replication_state_store_retries_total(operation: &str) {
    counter!("replication_state_store_retries_total", "operation" => operation.to_string())
        .increment(1);
}

/// Record a full resync fallback.
pub fn replication_resync(database: &str) {
    counter!("replication_resyncs_total", "database" => database.to_string()).increment(1);
}

/// Gauge for engine state.
pub fn replication_engine_state(state: &str) {
    // Encode state as numeric for alerting
    let value = match state {
        "created" => 0.0,
        "connecting" => 1.0,
        "determining-start" => 2.0,
        "streaming" => 3.0,
        "resyncing" => 4.0,
        "stopped" => 5.0,
        "failed" => 6.0,
        _ => -1.0,
    };
    gauge!("replication_engine_state").set(value);
}
