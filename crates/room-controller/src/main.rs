//! Room Controller
//!
//! WebSocket signaling server orchestrating multi-party audio/video rooms.
//!
//! # Servers
//!
//! - WebSocket server for client signaling (default: 0.0.0.0:4443)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing (`RC_LOG_FORMAT` selects text or JSON)
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Start the media engine pool
//! 5. Initialize actor system (`RoomRegistryActorHandle`)
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Start signaling server
//! 8. Wait for shutdown signal or engine failure

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use common::jwt::DEFAULT_CLOCK_SKEW;
use room_controller::actors::{ActorMetrics, RoomRegistryActorHandle};
use room_controller::config::{Config, LogFormat};
use room_controller::dispatch::handlers::build_dispatcher;
use room_controller::engine::simulated;
use room_controller::observability::{health_router, init_metrics_recorder, HealthState};
use room_controller::transport::{signaling_router, JwtIdentityResolver, SignalingState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Room Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        signaling_bind_address = %config.signaling_bind_address,
        health_bind_address = %config.health_bind_address,
        engine_workers = config.engine_workers,
        max_rooms = config.max_rooms,
        max_peers_per_room = config.max_peers_per_room,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let pool = Arc::new(simulated::spawn_pool(config.engine_workers).map_err(|e| {
        error!(error = %e, "Failed to start media engine pool");
        e
    })?);

    // Initialize actor system
    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let registry = RoomRegistryActorHandle::new(
        Arc::clone(&pool),
        config.registry_settings(),
        Arc::clone(&actor_metrics),
    );
    let dispatcher = Arc::new(build_dispatcher().map_err(|e| {
        error!(error = %e, "Invalid event handler definitions");
        e
    })?);
    info!(events = dispatcher.events().len(), "Actor system initialized");

    // All servers and connection actors stop when the registry does
    let shutdown_token = registry.child_token();

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

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

    // Signaling server
    let signaling_addr: SocketAddr = config.signaling_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.signaling_bind_address, "Invalid signaling bind address");
        format!("Invalid signaling bind address: {e}")
    })?;

    let signaling_app = signaling_router(SignalingState {
        registry: registry.clone(),
        dispatcher,
        identity: Arc::new(JwtIdentityResolver::new(
            &config.auth_secret,
            DEFAULT_CLOCK_SKEW,
        )),
        metrics: Arc::clone(&actor_metrics),
        shutdown: shutdown_token.child_token(),
    });

    let signaling_listener = tokio::net::TcpListener::bind(signaling_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %signaling_addr, "Failed to bind signaling server");
            format!("Failed to bind signaling server to {signaling_addr}: {e}")
        })?;

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
    info!("Room Controller running - press Ctrl+C to shutdown");

    let engine_failed = tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
            false
        }
        () = pool.failed() => {
            error!("Media engine worker died, shutting down");
            health_state.set_engine_failed();
            true
        }
    };

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    shutdown_token.cancel();

    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    if engine_failed {
        return Err("media engine worker died".into());
    }

    info!("Room Controller shutdown complete");
    Ok(())
}

fn init_tracing() {
    // Config is not loaded yet; read the format directly
    let format = std::env::var("RC_LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or(LogFormat::Text);

    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()),
    );

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
