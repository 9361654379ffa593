//! Mesh Coordinator
//!
//! Signaling server for peer-mesh rooms.
//!
//! # Servers
//!
//! The Mesh Coordinator runs two servers:
//! - WebSocket signaling server for clients (default: 0.0.0.0:8080)
//! - HTTP server for health, status and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (plain or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Initialize actor system (`Coordinator`)
//! 5. Start health HTTP server (liveness, readiness, status, metrics)
//! 6. Start signaling server and mark ready
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use mesh_coordinator::config::Config;
use mesh_coordinator::coordinator::Coordinator;
use mesh_coordinator::observability::{
    health_router, init_metrics_recorder, status_router, HealthState,
};
use mesh_coordinator::ws::{signaling_router, WsSessions, WsState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it decides the log format
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mesh_coordinator=debug,tower_http=debug".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Mesh Coordinator");
    info!(
        coordinator_id = %config.coordinator_id,
        signaling_bind_address = %config.signaling_bind_address,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        max_participants_per_room = config.max_participants_per_room,
        negotiation_timeout_secs = config.negotiation_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    // Initialize actor system
    info!("Initializing actor system...");
    let sessions = WsSessions::new();
    let coordinator = Arc::new(Coordinator::new(
        config.coordinator_settings(),
        Arc::clone(&sessions) as Arc<dyn mesh_coordinator::events::EventSink>,
    ));
    info!("Actor system initialized");

    // Servers stop when the coordinator shuts down
    let shutdown_token = coordinator.child_token();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    // Add /metrics endpoint served by Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let health_app = health_router(Arc::clone(&health_state))
        .merge(status_router(Arc::clone(&coordinator)))
        .merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let signaling_addr: SocketAddr = config.signaling_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.signaling_bind_address, "Invalid signaling bind address");
        format!("Invalid signaling bind address: {e}")
    })?;
    let signaling_listener = tokio::net::TcpListener::bind(signaling_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %signaling_addr, "Failed to bind signaling server");
            format!("Failed to bind signaling server to {signaling_addr}: {e}")
        })?;
    info!(addr = %signaling_addr, "Signaling server bound successfully");

    // Spawn health server task
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Spawn signaling server task
    let signaling_app = signaling_router(WsState {
        coordinator: Arc::clone(&coordinator),
        sessions,
    });
    let signaling_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %signaling_addr, "Signaling server starting");
        let server = axum::serve(signaling_listener, signaling_app).with_graceful_shutdown(
            async move {
                signaling_shutdown_token.cancelled().await;
                info!("Signaling server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Mesh Coordinator running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so traffic stops arriving
    health_state.set_not_ready();

    // Closes every room, then cancels the servers through the shared token
    if let Err(e) = coordinator.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }
    shutdown_token.cancel();

    info!("Mesh Coordinator shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
#[expect(
    clippy::expect_used,
    reason = "Signal handler installation failure is unrecoverable at startup"
)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
