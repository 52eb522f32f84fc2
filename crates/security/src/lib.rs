//! Per-client rate limiting, JWT/API-key authentication, and
//! permission-string authorisation.

mod auth;
mod rate_limit;
pub mod validation;

pub use auth::{ApiKeyStore, Identity, Jwt, API_KEY_PREFIX};
pub use rate_limit::RateLimiter;

use std::sync::Arc;
use std::time::Duration;

/// Spawns the background tick that expires stale rate-limit buckets,
/// on a 5-minute cleanup cadence.
pub fn spawn_rate_limiter_cleanup(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            let removed = limiter.cleanup_expired();
            if removed > 0 {
                tracing::debug!(removed, "expired stale rate-limit buckets");
            }
        }
    })
}
