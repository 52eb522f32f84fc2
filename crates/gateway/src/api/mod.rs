pub mod admin;
pub mod auth;
pub mod chat;
pub mod conversations;
pub mod health;
pub mod rate_limit;
pub mod statistics;
pub mod ws;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Splits routes into a public group (no auth) and a protected group
/// (identity required, rate limited), matching the split this
/// workspace's other gateway crate uses between dashboard/health and
/// everything that touches a conversation or admin action.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/health/detailed", get(health::health_detailed))
        .route("/conversations/recent", get(conversations::recent))
        .route("/conversations/:cid", get(conversations::get))
        .route("/conversations/search", post(conversations::search))
        .route("/statistics", get(statistics::statistics));

    let protected = Router::new()
        .route("/chat", post(chat::chat))
        .route("/stream/:cid", post(chat::stream))
        .route("/ws/:cid", get(ws::upgrade))
        .route("/admin/cleanup", post(admin::cleanup))
        .route("/admin/export", get(admin::export))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_identity))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::enforce));

    public.merge(protected).with_state(state)
}
