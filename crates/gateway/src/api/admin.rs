//! `POST /admin/cleanup` and `GET /admin/export` — both gated on the
//! `admin:all` permission via [`crate::api::auth::AdminGuard`].

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::{api_error, AdminGuard};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

pub async fn cleanup(_admin: AdminGuard, State(state): State<AppState>, Query(query): Query<DaysQuery>) -> axum::response::Response {
    let older_than_secs = query.days * 24 * 3600;
    let audit_removed = match state.audit.cleanup(older_than_secs).await {
        Ok(n) => n,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let bus_removed = state.bus.cleanup(older_than_secs);
    let rate_limiter_removed = state.rate_limiter.cleanup_expired();

    Json(json!({
        "audit_conversations_removed": audit_removed,
        "bus_streams_removed": bus_removed,
        "rate_limit_buckets_removed": rate_limiter_removed,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_format() -> String {
    "json".into()
}

/// `recent_results` page size while walking the audit sink for export;
/// keeps each call bounded instead of asking for `usize::MAX` at once.
const EXPORT_PAGE_SIZE: usize = 200;

pub async fn export(_admin: AdminGuard, State(state): State<AppState>, Query(query): Query<ExportQuery>) -> axum::response::Response {
    if query.format != "json" {
        return api_error(StatusCode::BAD_REQUEST, "only format=json is supported");
    }

    let cutoff = Utc::now() - chrono::Duration::days(query.days);
    let mut export = Vec::new();
    let mut offset = 0;
    loop {
        let page = match state.audit.recent_results(EXPORT_PAGE_SIZE, offset).await {
            Ok(r) => r,
            Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        if page.is_empty() {
            break;
        }
        let page_len = page.len();

        // `recent_results` is sorted newest-first, so the first entry
        // older than the cutoff means every later page is too.
        let mut hit_cutoff = false;
        for result in page {
            if result.created_at < cutoff {
                hit_cutoff = true;
                break;
            }
            let messages = match state.audit.messages_for(&result.conversation_id, usize::MAX, 0).await {
                Ok(m) => m,
                Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            };
            export.push(json!({ "result": result, "messages": messages }));
        }
        if hit_cutoff || page_len < EXPORT_PAGE_SIZE {
            break;
        }
        offset += EXPORT_PAGE_SIZE;
    }

    Json(export).into_response()
}
