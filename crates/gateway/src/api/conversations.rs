//! `GET /conversations/recent`, `GET /conversations/{cid}`, and
//! `POST /conversations/search` — read access over the audit sink.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use choir_security::validation;
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::api_error;
use crate::state::AppState;

fn default_limit() -> usize {
    20
}

fn default_offset() -> usize {
    0
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_offset")]
    pub offset: usize,
}

pub async fn recent(State(state): State<AppState>, Query(query): Query<RecentQuery>) -> axum::response::Response {
    match state.audit.recent_results(query.limit, query.offset).await {
        Ok(results) => Json(json!({ "conversations": results })).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_offset")]
    pub offset: usize,
}

pub async fn get(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> axum::response::Response {
    if let Err(e) = validation::validate_conversation_id(&conversation_id) {
        return api_error(StatusCode::BAD_REQUEST, e.to_string());
    }
    match state.audit.messages_for(&conversation_id, query.limit, query.offset).await {
        Ok(messages) if !messages.is_empty() => {
            Json(json!({ "conversation_id": conversation_id, "messages": messages })).into_response()
        }
        Ok(_) => api_error(StatusCode::NOT_FOUND, format!("no conversation {conversation_id}")),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_offset")]
    pub offset: usize,
}

pub async fn search(State(state): State<AppState>, Json(request): Json<SearchRequest>) -> axum::response::Response {
    let query = match validation::validate_search_term(&request.query) {
        Ok(q) => q,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.audit.search(&query, request.limit, request.offset).await {
        Ok(results) => Json(json!({ "results": results, "query": query })).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
