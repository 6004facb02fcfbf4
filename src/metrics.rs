// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Entries dropped by the filter chain
//! - Entries shipped per table, and the age of the newest shipped edit
//! - Dispatch failures per destination
//! - Batched-queue flushes and queue depth
//! - Asynchronous partitioned puts
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_sink_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! The library never installs a recorder. Without one, every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use replication_sink::metrics;
//! use std::time::Duration;
//!
//! metrics::record_edits_filtered(3);
//! metrics::record_batch_flush("orders-delivery", 500, 498, Duration::from_millis(40));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Record entries dropped by filtering.
pub fn record_edits_filtered(count: usize) {
    if count > 0 {
        counter!("replication_sink_edits_filtered_total").increment(count as u64);
    }
}

/// Record one entry shipped for a table.
pub fn record_completed(table: &str) {
    counter!("replication_sink_completed_total", "table" => table.to_string()).increment(1);
}

/// Record how old the newest shipped edit is, from its write time.
pub fn set_age_of_last_shipped_op(wal_group: &str, table: &str, write_time_ms: i64) {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let age_ms = now_ms.saturating_sub(write_time_ms).max(0);
    gauge!(
        "replication_sink_age_of_last_shipped_op_ms",
        "wal_group" => wal_group.to_string(),
        "table" => table.to_string()
    )
    .set(age_ms as f64);
}

/// Record a dispatch error by kind.
pub fn record_dispatch_error(destination: &str, kind: &str) {
    counter!(
        "replication_sink_dispatch_errors_total",
        "destination" => destination.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

// =============================================================================
// Batched Queue Metrics
// =============================================================================

/// Record one bulk flush of a destination's queue.
pub fn record_batch_flush(destination: &str, submitted: usize, succeeded: usize, duration: Duration) {
    let dest = destination.to_string();

    counter!("replication_sink_batch_submitted_total", "destination" => dest.clone())
        .increment(submitted as u64);
    counter!("replication_sink_batch_succeeded_total", "destination" => dest.clone())
        .increment(succeeded as u64);

    let failed = submitted.saturating_sub(succeeded);
    if failed > 0 {
        counter!("replication_sink_batch_failed_total", "destination" => dest.clone())
            .increment(failed as u64);
    }

    histogram!("replication_sink_batch_flush_duration_seconds", "destination" => dest.clone())
        .record(duration.as_secs_f64());
    histogram!("replication_sink_batch_size", "destination" => dest).record(submitted as f64);
}

/// Gauge for records waiting in a destination's queue.
pub fn set_queue_depth(destination: &str, depth: usize) {
    gauge!("replication_sink_queue_depth", "destination" => destination.to_string())
        .set(depth as f64);
}

// =============================================================================
// Destination Metrics
// =============================================================================

/// Record the outcome of an asynchronous partitioned put.
pub fn record_async_put(destination: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_sink_async_puts_total",
        "destination" => destination.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a destination created on demand.
pub fn record_destination_provisioned(destination: &str) {
    counter!(
        "replication_sink_destinations_provisioned_total",
        "destination" => destination.to_string()
    )
    .increment(1);
}
