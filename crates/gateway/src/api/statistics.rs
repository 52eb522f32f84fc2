//! `GET /statistics`: a composite snapshot across the audit sink, bus,
//! and fault layer.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::auth::api_error;
use crate::state::AppState;

pub async fn statistics(State(state): State<AppState>) -> axum::response::Response {
    match state.audit.stats().await {
        Ok(audit_stats) => Json(json!({
            "audit": audit_stats,
            "active_conversations": state.bus.active_conversations().len(),
            "rate_limiter_buckets": state.rate_limiter.bucket_count(),
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
