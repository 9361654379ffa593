//! Metrics definitions for the Mesh Coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mesh_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label is bounded by an enum in this crate:
//! - `state`: 5 values (link states)
//! - `reason`: link failures (2) or error labels (~16)
//! - `kind`: 4 values (signal kinds)
//! - `outcome`: 2 values (applied, failed)
//! - `actor_type`: 3 values (registry, room, connection)

use crate::link::{LinkFailure, LinkState, SignalKind};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Negotiation spans network round trips and candidate gathering
        .set_buckets_for_metric(
            Matcher::Prefix("mesh_negotiation".to_string()),
            &[
                0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set negotiation duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of open rooms.
///
/// Metric: `mesh_rooms_active`
/// Labels: none
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_rooms_active").set(count as f64);
}

/// Set the number of participants across all rooms.
///
/// Metric: `mesh_participants_active`
/// Labels: none
pub fn set_participants_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_participants_active").set(count as f64);
}

/// Adjust the number of live peer links.
///
/// Metric: `mesh_links_active`
/// Labels: none
///
/// Room actors own their link tables, so each reports a delta.
pub fn adjust_links_active(delta: i64) {
    #[allow(clippy::cast_precision_loss)]
    let delta = delta as f64;
    if delta >= 0.0 {
        gauge!("mesh_links_active").increment(delta);
    } else {
        gauge!("mesh_links_active").decrement(-delta);
    }
}

// ============================================================================
// Link Metrics
// ============================================================================

/// Record a link entering `state`.
///
/// Metric: `mesh_link_transitions_total`
/// Labels: `state`
pub fn record_link_transition(state: LinkState) {
    counter!("mesh_link_transitions_total", "state" => state.as_str()).increment(1);
}

/// Record a link failure.
///
/// Metric: `mesh_link_failures_total`
/// Labels: `reason` (timeout, transport_failure)
pub fn record_link_failure(failure: LinkFailure) {
    counter!("mesh_link_failures_total", "reason" => failure.as_str()).increment(1);
}

/// Record how long a negotiation round took to reach `Connected`.
///
/// Metric: `mesh_negotiation_duration_seconds`
/// Labels: none
pub fn record_negotiation_duration(duration: Duration) {
    histogram!("mesh_negotiation_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Signaling Metrics
// ============================================================================

/// Record a relayed signal.
///
/// Metric: `mesh_signals_relayed_total`
/// Labels: `kind`
pub fn record_signal_relayed(kind: SignalKind) {
    counter!("mesh_signals_relayed_total", "kind" => kind.as_str()).increment(1);
}

/// Record a rejected request.
///
/// Metric: `mesh_signals_rejected_total`
/// Labels: `reason` (bounded by `MeshError::metric_label`)
pub fn record_signal_rejected(reason: &'static str) {
    counter!("mesh_signals_rejected_total", "reason" => reason).increment(1);
}

/// Record the per-link outcome of a source substitution.
///
/// Metric: `mesh_source_substitutions_total`
/// Labels: `outcome` (applied, failed)
pub fn record_source_substitution(outcome: &'static str, count: usize) {
    counter!("mesh_source_substitutions_total", "outcome" => outcome).increment(count as u64);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Record an event dropped because a delivery mailbox was full or closed.
///
/// Metric: `mesh_events_dropped_total`
/// Labels: `actor_type`
pub fn record_event_dropped(actor_type: &'static str) {
    counter!("mesh_events_dropped_total", "actor_type" => actor_type).increment(1);
}

/// Record an actor panic.
///
/// Metric: `mesh_actor_panics_total`
/// Labels: `actor_type`
///
/// Any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("mesh_actor_panics_total", "actor_type" => actor_type).increment(1);
}
