//! Liveness and readiness endpoints.
//!
//! Both bypass authentication and rate limiting: orchestrators probe them
//! constantly and must never be throttled into a false failure.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    version: &'static str,
}

/// `GET /health`: the process is up.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    rate_limiter_records: usize,
}

/// `GET /ready`: the process can serve traffic.
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready",
        rate_limiter_records: state.limiter.len(),
    })
}
