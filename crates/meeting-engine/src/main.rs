//! Meeting Session Engine
//!
//! Daemon hosting the engine with in-memory stores. Deployments that bring
//! their own stores embed the library instead.
//!
//! # Servers
//!
//! - HTTP server for health and metrics (default: 0.0.0.0:8090)
//!
//! # Startup Flow
//!
//! 1. Load configuration and initialize tracing
//! 2. Initialize Prometheus metrics recorder
//! 3. Build the engine with in-memory stores
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Start reconciliation if configured
//! 6. Wait for shutdown signal, then cancel tasks and stop the actors

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::clock::{RandomIds, SystemClock};
use meeting_engine::config::Config;
use meeting_engine::fanout::EventFanout;
use meeting_engine::observability::{
    health_router, init_metrics_recorder, metrics_router, HealthState,
};
use meeting_engine::repositories::{InMemoryRoomDirectory, InMemoryStore};
use meeting_engine::tasks::start_reconciliation;
use meeting_engine::{EngineParts, MeetingEngine};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upper bound for each meeting actor to finish on shutdown.
const ACTOR_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.log_json));

    info!("Starting Meeting Session Engine");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        videoserver_url = %config.videoserver_url,
        videoserver_timeout_ms = u64::try_from(config.videoserver_timeout.as_millis()).unwrap_or(u64::MAX),
        operation_timeout_secs = config.operation_timeout.as_secs(),
        health_bind_address = %config.health_bind_address,
        reconciliation = config.reconcile_interval.is_some(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let store = InMemoryStore::new();
    let parts = EngineParts {
        meetings: Arc::new(store.clone()),
        participants: Arc::new(store.clone()),
        waiting: Arc::new(store.clone()),
        gateway_meetings: Arc::new(store.clone()),
        gateway_sessions: Arc::new(store),
        rooms: Arc::new(InMemoryRoomDirectory::new()),
        sink: Arc::new(EventFanout::new()),
        clock: Arc::new(SystemClock),
        ids: Arc::new(RandomIds),
    };
    let engine = Arc::new(
        MeetingEngine::new(&config, parts, shutdown_token.child_token())
            .context("failed to build meeting engine")?,
    );
    info!("Meeting engine initialized");

    // Health server MUST start; fail startup otherwise
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        anyhow::anyhow!("invalid health bind address: {e}")
    })?;

    let app = health_router(Arc::clone(&health_state))
        .merge(metrics_router(prometheus_handle))
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("failed to bind health server to {health_addr}"))?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let reconcile_task = config.reconcile_interval.map(|interval| {
        tokio::spawn(start_reconciliation(
            Arc::clone(&engine),
            interval,
            shutdown_token.child_token(),
        ))
    });

    health_state.set_ready();
    info!("Meeting Session Engine running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop receiving traffic before tearing anything down
    health_state.begin_draining();
    shutdown_token.cancel();

    if let Some(task) = reconcile_task {
        if let Err(e) = task.await {
            error!(error = %e, "Reconciliation task failed");
        }
    }
    engine.shutdown(ACTOR_SHUTDOWN_DEADLINE).await;
    if let Err(e) = health_task.await {
        error!(error = %e, "Health server task failed");
    }

    info!("Meeting Session Engine shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "meeting_engine=debug,tower_http=debug".into());

    let (json_layer, text_layer) = if json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the process
/// cannot shut down gracefully.
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
