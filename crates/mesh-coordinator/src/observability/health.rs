//! Health endpoints for the Mesh Coordinator.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (accepting new rooms?)
//! - `GET /status` - Room and participant counts as JSON
//!
//! The `/metrics` endpoint is merged in by the binary from the Prometheus
//! exporter handle.

use crate::coordinator::Coordinator;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True once the signaling listener is bound; false while draining.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Router with `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

/// Router with `/status`, backed by the coordinator's registry.
pub fn status_router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .with_state(coordinator)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status_handler(
    State(coordinator): State<Arc<Coordinator>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let status = coordinator
        .status()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(serde_json::json!({
        "coordinatorId": coordinator.coordinator_id(),
        "rooms": status.room_count,
        "participants": status.participant_count,
        "draining": status.is_draining,
    })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorSettings;
    use crate::errors::DeliveryError;
    use crate::events::{EventSink, RoomEvent};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use common::types::ParticipantId;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn deliver(&self, _to: ParticipantId, _event: RoomEvent) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[test]
    fn test_health_state_default() {
        let state = HealthState::new();
        assert!(state.is_live(), "Should be live by default");
        assert!(!state.is_ready(), "Should not be ready by default");

        state.set_ready();
        assert!(state.is_ready());
        state.set_not_ready();
        assert!(!state.is_ready());
    }

    async fn get(app: Router, uri: &str) -> axum::response::Response {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        app.oneshot(request)
            .await
            .expect("Failed to execute request")
    }

    #[tokio::test]
    async fn test_health_router_endpoints() {
        let state = Arc::new(HealthState::new());

        let response = get(health_router(Arc::clone(&state)), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready();
        let response = get(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get(health_router(state), "/unknown").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_endpoint_reports_counts() {
        let settings = CoordinatorSettings {
            coordinator_id: "mesh-test".to_string(),
            ..CoordinatorSettings::default()
        };
        let coordinator = Arc::new(Coordinator::new(settings, Arc::new(NullSink)));
        coordinator
            .create_room(ParticipantId::from_u128(1), "Alice", "demo")
            .await
            .unwrap();

        let response = get(status_router(Arc::clone(&coordinator)), "/status").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["coordinatorId"], "mesh-test");
        assert_eq!(json["rooms"], 1);
        assert_eq!(json["participants"], 1);
        assert_eq!(json["draining"], false);

        coordinator.shutdown().await.unwrap();
    }
}
