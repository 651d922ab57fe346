//! Room Coordinator binary.
//!
//! Hosts the room directory and the operational HTTP endpoints. Client
//! traffic reaches rooms through the orchestration layer that embeds
//! [`RoomDirectoryHandle`]; this binary only wires collaborators together and
//! manages process lifecycle.
//!
//! # Startup order
//!
//! 1. Tracing
//! 2. Configuration
//! 3. Prometheus recorder
//! 4. Redis snapshot store
//! 5. Postgres registry (migrations applied)
//! 6. Ledger and issuer clients
//! 7. Room directory
//! 8. Health server (bound before reporting ready)

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::secret::ExposeSecret;
use room_coordinator::actors::{ActorMetrics, RoomDirectoryHandle, RoomServices};
use room_coordinator::clock::SystemClock;
use room_coordinator::config::Config;
use room_coordinator::observability::metrics::init_metrics_recorder;
use room_coordinator::observability::{health_router, HealthState};
use room_coordinator::registry::PgRoomRegistry;
use room_coordinator::services::{HttpCreditLedger, HttpCredentialIssuer};
use room_coordinator::store::RedisRoomStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Format is read ahead of Config so that config errors are logged in it.
    let log_json = std::env::var("RC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_coordinator=debug,tower_http=debug".into()),
        )
        .with(log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!log_json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Room Coordinator");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        ledger_url = %config.ledger_url,
        issuer_url = %config.issuer_url,
        health_bind_address = %config.health_bind_address,
        heartbeat_interval_seconds = config.policy.heartbeat_interval_seconds,
        directory_sweep_seconds = config.directory_sweep_seconds,
        log_json = config.log_json,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let actor_metrics = ActorMetrics::new();
    let health_state = Arc::new(HealthState::new(Arc::clone(&actor_metrics)));

    info!("Connecting to Redis...");
    let store = RedisRoomStore::connect(config.redis_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?;
    info!("Redis connection established");

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to apply registry migrations");
            e
        })?;
    let registry = PgRoomRegistry::new(db_pool);
    info!("Database connection established, migrations applied");

    let ledger = HttpCreditLedger::new(config.ledger_url.clone(), config.service_token.clone())?;
    let issuer =
        HttpCredentialIssuer::new(config.issuer_url.clone(), config.service_token.clone())?;

    let services = RoomServices {
        ledger: Arc::new(ledger),
        issuer: Arc::new(issuer),
        registry: Arc::new(registry),
        store: Arc::new(store),
        clock: Arc::new(SystemClock),
        policy: config.policy.clone(),
        metrics: Arc::clone(&actor_metrics),
    };

    let directory = RoomDirectoryHandle::new(
        config.instance_id.clone(),
        services,
        Duration::from_secs(config.directory_sweep_seconds),
    );
    info!("Room directory started");

    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    // Bind before reporting ready so a port conflict fails startup.
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let app = health_router(Arc::clone(&health_state), prometheus_handle);
    let shutdown_token = CancellationToken::new();
    let health_shutdown_token = shutdown_token.child_token();
    let health_server = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    health_state.set_ready();
    info!("Room Coordinator ready - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, draining rooms...");

    // Stop advertising readiness before rooms start refusing work.
    health_state.set_draining();

    if let Err(e) = directory.shutdown().await {
        warn!(error = %e, "Room directory shutdown error");
    }

    shutdown_token.cancel();
    if tokio::time::timeout(Duration::from_secs(5), health_server)
        .await
        .is_err()
    {
        warn!("Health server did not stop in time");
    }

    info!(
        participants = actor_metrics.participant_count(),
        pending_audit = actor_metrics.pending_audit_count(),
        "Room Coordinator shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Without a signal handler the process cannot shut down cleanly"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Without a signal handler the process cannot shut down cleanly"
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
