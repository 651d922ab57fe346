//! Metrics definitions for the Room Coordinator.
//!
//! Naming follows Prometheus conventions:
//! - `rc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Room ids, wallets and connection ids are never used as labels. Every
//! label is drawn from a closed set of values defined in this crate.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

const INTERNAL_CALL_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
];

const REMOTE_CALL_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
];

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or bucket
/// configuration is rejected.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Ledger and issuer are remote HTTP services
        .set_buckets_for_metric(
            Matcher::Prefix("rc_ledger".to_string()),
            REMOTE_CALL_BUCKETS,
        )
        .map_err(|e| format!("Failed to set ledger latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rc_issuer".to_string()),
            REMOTE_CALL_BUCKETS,
        )
        .map_err(|e| format!("Failed to set issuer latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rc_store".to_string()),
            INTERNAL_CALL_BUCKETS,
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rc_registry".to_string()),
            INTERNAL_CALL_BUCKETS,
        )
        .map_err(|e| format!("Failed to set registry latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Rooms & Participants (Gauges)
// ============================================================================

/// Metric: `rc_rooms_active`. Room actors currently live on this instance.
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Metric: `rc_participants_active`. Participants held by live room actors.
pub fn set_participants_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_participants_active").set(count as f64);
}

/// Metric: `rc_actor_mailbox_depth`
/// Labels: `actor_type` (directory, room)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Metering (Counters)
// ============================================================================

/// Metric: `rc_debited_seconds_total`. Seconds the ledger accepted as debited.
pub fn record_debit(seconds: u64) {
    counter!("rc_debited_seconds_total").increment(seconds);
}

/// Metric: `rc_credit_events_total`
/// Labels: `event` (credits_low, credits_exhausted)
pub fn record_credit_event(event: &str) {
    counter!("rc_credit_events_total", "event" => event.to_string()).increment(1);
}

/// Metric: `rc_renewals_total`
/// Labels: `outcome` (granted, denied)
pub fn record_renewal(outcome: &str) {
    counter!("rc_renewals_total", "outcome" => outcome.to_string()).increment(1);
}

/// Metric: `rc_participants_reaped_total`. Participants removed for missing heartbeats.
pub fn record_participant_reaped() {
    counter!("rc_participants_reaped_total").increment(1);
}

/// Metric: `rc_rooms_closed_total`
/// Labels: `reason` (explicit, last_participant_left, empty_on_tick)
pub fn record_room_closed(reason: &str) {
    counter!("rc_rooms_closed_total", "reason" => reason.to_string()).increment(1);
}

// ============================================================================
// Audit Outbox
// ============================================================================

/// Metric: `rc_audit_flush_failures_total`. Registry writes that will be retried.
pub fn record_audit_flush_failure() {
    counter!("rc_audit_flush_failures_total").increment(1);
}

/// Metric: `rc_audit_rejected_total`. Registry writes set aside for good.
pub fn record_audit_rejected(kind: &'static str) {
    counter!("rc_audit_rejected_total", "kind" => kind).increment(1);
}

/// Metric: `rc_audit_pending`. Undelivered audit records across live rooms.
pub fn set_audit_pending(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_audit_pending").set(count as f64);
}

// ============================================================================
// Latency (Histograms)
// ============================================================================

/// Metric: `rc_ledger_latency_seconds`
/// Labels: `operation` (get_balance, debit), `status` (success, error)
pub fn record_ledger_latency(operation: &str, status: &str, duration: Duration) {
    histogram!(
        "rc_ledger_latency_seconds",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Metric: `rc_issuer_latency_seconds`
/// Labels: `status` (success, error)
pub fn record_issuer_latency(status: &str, duration: Duration) {
    histogram!("rc_issuer_latency_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
}

/// Metric: `rc_store_latency_seconds`
/// Labels: `operation` (load, claim, save, delete)
pub fn record_store_latency(operation: &str, duration: Duration) {
    histogram!("rc_store_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Metric: `rc_registry_latency_seconds`
/// Labels: `operation` (record, purge)
pub fn record_registry_latency(operation: &str, duration: Duration) {
    histogram!("rc_registry_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Faults
// ============================================================================

/// Metric: `rc_actor_panics_total`
/// Labels: `actor_type` (directory, room)
pub fn record_actor_panic(actor_type: &str) {
    counter!("rc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Metric: `rc_fenced_out_total`. Writes rejected because a newer actor owns the room.
pub fn record_fenced_out() {
    counter!("rc_fenced_out_total").increment(1);
}

/// Metric: `rc_errors_total`
/// Labels: `operation`, `error_type` (a `RoomError::error_code`)
pub fn record_error(operation: &str, error_type: &str) {
    counter!(
        "rc_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}
