//! Metrics definitions for the verify gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gw_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `outcome`: verdict labels from `Verdict::label` (~8 values)
//! - `operation`: `lookup`, `save`, `ping`
//! - `status`: a handful of fixed strings per metric

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Verification is mostly local work plus one cache round trip
        .set_buckets_for_metric(
            Matcher::Prefix("gw_verify".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set verify buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gw_cache".to_string()),
            &[0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.000],
        )
        .map_err(|e| format!("Failed to set cache buckets: {e}"))?
        // Renewal goes to the identity provider
        .set_buckets_for_metric(
            Matcher::Prefix("gw_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set refresh buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Verification Metrics
// ============================================================================

/// Record one verification verdict.
///
/// Metric: `gw_verify_outcomes_total`, `gw_verify_duration_seconds`
/// Labels: `outcome`
pub fn record_verify_outcome(outcome: &'static str, duration: Duration) {
    histogram!("gw_verify_duration_seconds", "outcome" => outcome).record(duration.as_secs_f64());
    counter!("gw_verify_outcomes_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Cache Metrics
// ============================================================================

/// Record a token cache operation.
///
/// Metric: `gw_cache_operations_total`, `gw_cache_operation_duration_seconds`
/// Labels: `operation`, `status`
///
/// Lookup statuses: `hit`, `stale`, `miss`, `error`.
/// Save statuses: `success`, `error`.
pub fn record_cache_operation(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("gw_cache_operation_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
    counter!("gw_cache_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Refresh Metrics
// ============================================================================

/// Record a renewal attempt against the identity provider.
///
/// Metric: `gw_refresh_total`, `gw_refresh_duration_seconds`
/// Labels: `status` (`success`, `rejected`, `error`, `timeout`)
pub fn record_refresh(status: &'static str, duration: Duration) {
    histogram!("gw_refresh_duration_seconds").record(duration.as_secs_f64());
    counter!("gw_refresh_total", "status" => status).increment(1);
}
