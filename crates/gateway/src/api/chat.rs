//! `POST /chat` (blocking) and `POST /stream/{cid}` (returns a
//! websocket URL the caller then attaches to).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use choir_domain::error::Error;
use choir_security::validation;
use choir_security::Identity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Accepted for wire compatibility; the agent roster is fixed at
    /// startup, so this has no effect yet.
    #[serde(default)]
    pub num_agents: Option<u32>,
    #[serde(default)]
    pub turns: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub final_answer: String,
    pub winning_votes: usize,
    pub total_votes: usize,
    pub method: &'static str,
}

fn error_response(e: Error) -> axum::response::Response {
    let status = StatusCode::from_u16(e.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    api_error(status, e.to_string())
}

pub async fn chat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<ChatRequest>,
) -> axum::response::Response {
    if !identity.has_permission("chat:write") {
        return api_error(StatusCode::FORBIDDEN, "chat:write permission required");
    }
    let message = match validation::validate_message_content(&request.message) {
        Ok(m) => m,
        Err(e) => return error_response(e),
    };
    if let Some(cid) = &request.conversation_id {
        if let Err(e) = validation::validate_conversation_id(cid) {
            return error_response(e);
        }
    }

    let conversation_id = request.conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let turns = request.turns.unwrap_or(state.default_turns);

    match state.orchestrator.run(&message, &conversation_id, turns).await {
        Ok(outcome) => Json(ChatResponse {
            conversation_id,
            final_answer: outcome.final_answer,
            winning_votes: outcome.winning_votes,
            total_votes: outcome.total_votes,
            method: outcome.method.as_str(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Serialize)]
pub struct StreamStarted {
    pub conversation_id: String,
    pub status: &'static str,
    pub websocket_url: String,
}

/// Kicks off the turn loop in the background and returns immediately
/// with the websocket URL a caller attaches to for live events —
/// `chat`'s async twin.
pub async fn stream(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<ChatRequest>,
) -> axum::response::Response {
    if !identity.has_permission("chat:write") {
        return api_error(StatusCode::FORBIDDEN, "chat:write permission required");
    }
    if let Err(e) = validation::validate_conversation_id(&conversation_id) {
        return error_response(e);
    }
    let prompt = match validation::validate_message_content(&request.message) {
        Ok(m) => m,
        Err(e) => return error_response(e),
    };

    let turns = request.turns.unwrap_or(state.default_turns);
    let orchestrator = state.orchestrator.clone();
    let cid = conversation_id.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(&prompt, &cid, turns).await {
            tracing::warn!(conversation_id = %cid, error = %e, "streamed conversation ended in error");
        }
    });

    Json(StreamStarted {
        websocket_url: format!("/ws/{conversation_id}"),
        conversation_id,
        status: "started",
    })
    .into_response()
}
