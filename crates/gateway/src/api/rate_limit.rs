//! Per-`client_id:client_ip` rate limiting, applied ahead of identity
//! resolution so an unauthenticated flood is still throttled.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use choir_domain::error::Error;
use choir_security::RateLimiter;

use crate::api::auth::api_error;
use crate::state::AppState;

fn client_id(req: &Request<Body>) -> String {
    req.headers()
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

pub async fn enforce(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip().to_string())
        .unwrap_or_else(|| "unknown".into());
    let identity = RateLimiter::identity(&client_id(&req), &addr);

    match state.rate_limiter.check(&identity) {
        Ok(()) => next.run(req).await,
        Err(Error::RateLimited { retry_after_secs }) => {
            let mut response = api_error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
