//! Observability for the Mesh Coordinator.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Signal payloads and display names are never logged or used as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `mesh_rooms_active` | Gauge | none |
//! | `mesh_participants_active` | Gauge | none |
//! | `mesh_links_active` | Gauge | none |
//! | `mesh_link_transitions_total` | Counter | `state` |
//! | `mesh_link_failures_total` | Counter | `reason` |
//! | `mesh_negotiation_duration_seconds` | Histogram | none |
//! | `mesh_signals_relayed_total` | Counter | `kind` |
//! | `mesh_signals_rejected_total` | Counter | `reason` |
//! | `mesh_source_substitutions_total` | Counter | `outcome` |
//! | `mesh_events_dropped_total` | Counter | `actor_type` |
//! | `mesh_actor_panics_total` | Counter | `actor_type` |

pub mod health;
pub mod metrics;

pub use health::{health_router, status_router, HealthState};
pub use metrics::init_metrics_recorder;
