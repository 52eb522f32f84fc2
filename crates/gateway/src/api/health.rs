//! `GET /health` (liveness probe) and `GET /health/detailed` (per-
//! component status table, including every circuit breaker's state).

use axum::extract::State;
use axum::Json;
use choir_fault::BreakerState;
use serde_json::json;

use crate::state::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

fn breaker_status(state: BreakerState) -> &'static str {
    match state {
        BreakerState::Closed => "closed",
        BreakerState::Open => "open",
        BreakerState::HalfOpen => "half_open",
    }
}

pub async fn health_detailed(State(state): State<AppState>) -> Json<serde_json::Value> {
    let audit_stats = state.audit.stats().await.ok();
    let breakers: Vec<serde_json::Value> = state
        .fault
        .breaker_snapshot()
        .into_iter()
        .map(|(name, breaker_state)| json!({ "name": name, "state": breaker_status(breaker_state) }))
        .collect();

    Json(json!({
        "status": "healthy",
        "components": {
            "bus": { "active_conversations": state.bus.active_conversations().len() },
            "audit": audit_stats,
            "broadcast": { "status": "up" },
            "rate_limiter": { "active_buckets": state.rate_limiter.bucket_count() },
            "circuit_breakers": breakers,
        },
    }))
}
