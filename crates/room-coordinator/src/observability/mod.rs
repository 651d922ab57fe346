//! Observability for the Room Coordinator.
//!
//! - [`metrics`] - Prometheus metric definitions and recording helpers
//! - [`health`] - Liveness, readiness and `/metrics` HTTP endpoints

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, ReadinessReport};
