//! Health endpoints for the Room Coordinator.
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with room and participant counts; 503
//!   until startup finishes and again once draining begins
//! - `GET /metrics` - Prometheus text format, rendered from the installed
//!   recorder
//!
//! None of these endpoints are authenticated. Metrics carry no room ids,
//! wallets or connection ids.

use crate::actors::ActorMetrics;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Readiness flags plus the actor counters reported on `/ready`.
#[derive(Debug)]
pub struct HealthState {
    ready: AtomicBool,
    draining: AtomicBool,
    actors: Arc<ActorMetrics>,
}

/// Body of `GET /ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    pub rooms: usize,
    pub participants: usize,
    pub pending_audit: usize,
}

impl HealthState {
    /// Not ready until [`HealthState::set_ready`] is called.
    #[must_use]
    pub fn new(actors: Arc<ActorMetrics>) -> Self {
        Self {
            ready: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            actors,
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Rooms are being drained; load balancers should stop routing here.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::Release);
        self.ready.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn report(&self) -> ReadinessReport {
        let status = if self.is_draining() {
            "draining"
        } else if self.is_ready() {
            "ready"
        } else {
            "starting"
        };
        ReadinessReport {
            status,
            rooms: self.actors.room_count(),
            participants: self.actors.participant_count(),
            pending_audit: self.actors.pending_audit_count(),
        }
    }
}

/// Operational router: `/health`, `/ready` and `/metrics`.
///
/// Requests are traced through `TraceLayer` (filter with `tower_http=...`).
pub fn health_router(health_state: Arc<HealthState>, metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness))
        .with_state(health_state)
        .merge(
            Router::new()
                .route("/metrics", get(scrape))
                .with_state(metrics_handle),
        )
        .layer(TraceLayer::new_for_http())
}

async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<ReadinessReport>) {
    let report = state.report();
    let code = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

#[tracing::instrument(skip_all, name = "rc.metrics.scrape")]
async fn scrape(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
