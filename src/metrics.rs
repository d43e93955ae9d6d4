//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Store mutations and materialization downloads
//! - Catalog captures
//! - Replication runs and per-target outcomes
//! - Single-flight guard state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `emoji_replicator_`. Counters end in
//! `_total`, durations are histograms in seconds.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record a store mutation (`save`, `update`, `delete`).
pub fn record_store_mutation(operation: &'static str, success: bool) {
    counter!(
        "emoji_replicator_store_mutations_total",
        "operation" => operation,
        "status" => status_label(success)
    )
    .increment(1);
}

/// Record a resource download and its size.
pub fn record_download(success: bool, bytes: usize, duration: Duration) {
    counter!("emoji_replicator_downloads_total", "status" => status_label(success)).increment(1);
    if success {
        counter!("emoji_replicator_downloaded_bytes_total").increment(bytes as u64);
    }
    histogram!("emoji_replicator_download_duration_seconds").record(duration.as_secs_f64());
}

/// Record a catalog capture.
pub fn record_capture(success: bool, emoji_count: usize, duration: Duration) {
    counter!("emoji_replicator_captures_total", "status" => status_label(success)).increment(1);
    if success {
        gauge!("emoji_replicator_catalog_size").set(emoji_count as f64);
    }
    histogram!("emoji_replicator_capture_duration_seconds").record(duration.as_secs_f64());
}

/// Record a run that acquired the single-flight guard.
pub fn record_run_started(operation: &str) {
    counter!("emoji_replicator_runs_started_total", "operation" => operation.to_string())
        .increment(1);
}

/// Record a run rejected by the single-flight guard.
pub fn record_run_rejected(operation: &str) {
    counter!("emoji_replicator_runs_rejected_total", "operation" => operation.to_string())
        .increment(1);
}

/// Record a completed replication run.
pub fn record_replication_run(succeeded: usize, failed: usize, duration: Duration) {
    counter!("emoji_replicator_replication_runs_total").increment(1);
    counter!("emoji_replicator_target_outcomes_total", "status" => "success")
        .increment(succeeded as u64);
    counter!("emoji_replicator_target_outcomes_total", "status" => "failure")
        .increment(failed as u64);
    histogram!("emoji_replicator_replication_duration_seconds").record(duration.as_secs_f64());
}

/// Record a per-target failure with the phase it happened in.
pub fn record_target_failure(target_id: &str, phase: &str) {
    counter!(
        "emoji_replicator_target_failures_total",
        "target_id" => target_id.to_string(),
        "phase" => phase.to_string()
    )
    .increment(1);
}

/// Gauge for the guard state (0 = idle, 1 = capturing, 2 = replicating).
pub fn set_sync_state(state: &str) {
    let value = match state {
        "Idle" => 0.0,
        "Running(capture)" => 1.0,
        "Running(replicate)" => 2.0,
        _ => -1.0,
    };
    gauge!("emoji_replicator_sync_state").set(value);
}
