//! Metrics definitions for the bridge runtime core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `bridge_` prefix
//! - `_total` suffix for counters
//!
//! The two admission control gauges keep the names operators already alert
//! on: `bridge_active_puppets_total` and `bridge_blocked`.
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `status`: 2 values (success, error)

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const METRIC_ACTIVE_PUPPETS: &str = "bridge_active_puppets_total";
pub const METRIC_BLOCKED: &str = "bridge_blocked";
pub const METRIC_PERIODIC_SYNC: &str = "bridge_periodic_sync_total";
pub const METRIC_BRIDGE_INFO_RESEND: &str = "bridge_info_resend_total";

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Publish the admission control state.
///
/// Metrics: `bridge_active_puppets_total`, `bridge_blocked` (0/1)
pub fn set_block_state(active_puppets: u64, blocked: bool) {
    // Puppet counts stay far below 2^53
    #[allow(clippy::cast_precision_loss)]
    gauge!(METRIC_ACTIVE_PUPPETS).set(active_puppets as f64);
    gauge!(METRIC_BLOCKED).set(if blocked { 1.0 } else { 0.0 });
}

/// Record the outcome of one session's periodic sync.
///
/// Metric: `bridge_periodic_sync_total`
/// Labels: `status`
pub fn record_periodic_sync(status: &'static str) {
    counter!(METRIC_PERIODIC_SYNC, "status" => status).increment(1);
}

/// Record the outcome of one portal's bridge info resend.
///
/// Metric: `bridge_info_resend_total`
/// Labels: `status`
pub fn record_bridge_info_resend(status: &'static str) {
    counter!(METRIC_BRIDGE_INFO_RESEND, "status" => status).increment(1);
}
