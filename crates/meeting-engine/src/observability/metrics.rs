//! Metrics definitions for the meeting engine.
//!
//! All metrics follow Prometheus naming conventions:
//! - `engine_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `verb`: videoserver verbs plus plugin requests (~15 values)
//! - `status`: success, rejected, error
//! - `reason`: `LeaveReason` variants (4 values)
//! - `destination`: user, session
//! - `operation`: engine operations (~20 values)
//! - `error_type`: `EngineError::error_type_label` values
//! - `resource`: gateway_meeting, gateway_session

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Videoserver request
/// buckets extend to the default request timeout.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("engine_gateway_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set gateway request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("engine_operation".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set operation duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Videoserver Metrics
// ============================================================================

/// Record one videoserver HTTP exchange.
///
/// Metrics: `engine_gateway_requests_total{verb,status}`,
/// `engine_gateway_request_duration_seconds{verb}`
///
/// `verb` is the protocol verb, or the plugin `request` for `message` calls.
pub fn record_gateway_request(verb: &str, status: &str, duration: Duration) {
    counter!("engine_gateway_requests_total",
        "verb" => verb.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!("engine_gateway_request_duration_seconds", "verb" => verb.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Meeting & Participant Metrics
// ============================================================================

/// Adjust the number of active meetings.
///
/// Metric: `engine_meetings_active`
pub fn meeting_activated() {
    gauge!("engine_meetings_active").increment(1.0);
}

/// Metric: `engine_meetings_active`
pub fn meeting_deactivated() {
    gauge!("engine_meetings_active").decrement(1.0);
}

/// Metric: `engine_participants_joined_total`
pub fn record_participant_joined() {
    counter!("engine_participants_joined_total").increment(1);
}

/// Metric: `engine_participants_left_total{reason}`
pub fn record_participant_left(reason: &str) {
    counter!("engine_participants_left_total", "reason" => reason.to_string()).increment(1);
}

// ============================================================================
// Event Fanout
// ============================================================================

/// Metric: `engine_events_published_total{destination}`
///
/// `destination` is `user` or `session`.
pub fn record_event_published(destination: &str) {
    counter!("engine_events_published_total", "destination" => destination.to_string())
        .increment(1);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Set the number of messages queued across all meeting actors.
///
/// Metric: `engine_actor_mailbox_depth`
pub fn set_actor_mailbox_depth(depth: usize) {
    // usize to f64 conversion is safe for realistic mailbox depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("engine_actor_mailbox_depth").set(depth as f64);
}

/// Record how long a mutating operation took, including mailbox wait.
///
/// Metric: `engine_operation_duration_seconds{operation}`
pub fn record_operation_duration(operation: &str, duration: Duration) {
    histogram!("engine_operation_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Errors & Reconciliation
// ============================================================================

/// Record error by category.
///
/// Metric: `engine_errors_total`
/// Labels: `operation`, `error_type`
pub fn record_error(operation: &str, error_type: &str) {
    counter!("engine_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a videoserver resource torn down by reconciliation.
///
/// Metric: `engine_reconciled_resources_total{resource}`
pub fn record_reconciled(resource: &str) {
    counter!("engine_reconciled_resources_total", "resource" => resource.to_string())
        .increment(1);
}
