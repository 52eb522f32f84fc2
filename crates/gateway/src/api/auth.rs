//! Identity resolution: a bearer JWT or `X-API-Key` header is turned
//! into a [`choir_security::Identity`] and attached to the request.
//!
//! If neither a JWT secret nor any API key has ever been configured,
//! every request is treated as an implicit `admin:all` identity — the
//! same dev-mode bypass this workspace uses elsewhere for unconfigured
//! auth, so `serve` is usable out of the box before an operator has
//! issued any credentials.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use choir_security::Identity;
use serde_json::json;

use crate::state::AppState;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn auth_is_unconfigured(state: &AppState) -> bool {
    state.jwt.is_none() && state.api_keys.is_empty()
}

fn dev_identity() -> Identity {
    Identity {
        subject: "dev".into(),
        permissions: vec!["admin:all".into()],
    }
}

pub fn resolve_identity(state: &AppState, parts: &Parts) -> Option<Identity> {
    if auth_is_unconfigured(state) {
        return Some(dev_identity());
    }

    if let Some(value) = parts.headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            if let Some(jwt) = &state.jwt {
                if let Some(identity) = jwt.verify(token) {
                    return Some(identity);
                }
            }
            if let Some(identity) = state.api_keys.validate(token) {
                return Some(identity);
            }
        }
    }
    if let Some(key) = parts.headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if let Some(identity) = state.api_keys.validate(key) {
            return Some(identity);
        }
    }
    None
}

/// Attaches an [`Identity`] to authenticated requests; rejects with 401
/// otherwise. Permission checks for individual routes happen downstream.
pub async fn require_identity(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let identity = resolve_identity(&state, &parts);
    match identity {
        Some(identity) => {
            let mut req = Request::from_parts(parts, body);
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => api_error(StatusCode::UNAUTHORIZED, "missing or invalid credentials"),
    }
}

/// Extractor requiring the `admin:all` permission; use in admin-only
/// handler signatures instead of threading a permission check by hand.
pub struct AdminGuard(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = resolve_identity(state, parts)
            .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing or invalid credentials"))?;
        if identity.has_permission("admin:all") {
            Ok(AdminGuard(identity))
        } else {
            Err(api_error(StatusCode::FORBIDDEN, "admin:all permission required"))
        }
    }
}
