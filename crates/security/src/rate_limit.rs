use std::collections::HashMap;

use chrono::{DateTime, Utc};
use choir_domain::config::RateLimitConfig;
use choir_domain::error::{Error, Result};
use parking_lot::RwLock;

struct Bucket {
    requests_in_window: u32,
    window_start: DateTime<Utc>,
    burst_tokens: u32,
    blocked_until: Option<DateTime<Utc>>,
}

impl Bucket {
    fn fresh(now: DateTime<Utc>, burst: u32) -> Self {
        Self {
            requests_in_window: 0,
            window_start: now,
            burst_tokens: burst,
            blocked_until: None,
        }
    }
}

/// Sliding-window + burst-token limiter keyed `client_id:client_ip`.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn identity(client_id: &str, client_ip: &str) -> String {
        format!("{client_id}:{client_ip}")
    }

    /// Admit or reject a request for `identity`, mutating its bucket.
    /// Returns `Ok(())` if admitted, `Err(RateLimited)` otherwise.
    pub fn check(&self, identity: &str) -> Result<()> {
        let now = Utc::now();
        let window = chrono::Duration::seconds(self.config.window_secs);
        let mut buckets = self.buckets.write();
        let bucket = buckets
            .entry(identity.to_string())
            .or_insert_with(|| Bucket::fresh(now, self.config.burst));

        if now - bucket.window_start >= window {
            *bucket = Bucket::fresh(now, self.config.burst);
        }

        if let Some(blocked_until) = bucket.blocked_until {
            if now < blocked_until {
                let retry_after = (blocked_until - now).num_seconds().max(0) as u64;
                return Err(Error::RateLimited { retry_after_secs: retry_after });
            }
        }

        if bucket.burst_tokens > 0 {
            bucket.burst_tokens -= 1;
            bucket.requests_in_window += 1;
            return Ok(());
        }

        if bucket.requests_in_window < self.config.requests {
            bucket.requests_in_window += 1;
            return Ok(());
        }

        let blocked_until = (bucket.window_start + window).min(now + window);
        bucket.blocked_until = Some(blocked_until);
        let retry_after = (blocked_until - now).num_seconds().max(0) as u64;
        Err(Error::RateLimited { retry_after_secs: retry_after })
    }

    /// Drop buckets untouched for more than `2 * window_secs`, and
    /// any bucket whose block has already expired past that horizon.
    /// Intended to run on a 5-minute background tick.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let stale_after = chrono::Duration::seconds(self.config.window_secs * 2);
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, b| now - b.window_start <= stale_after);
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> RateLimitConfig {
        RateLimitConfig {
            requests: 2,
            window_secs: 3600,
            burst: 1,
        }
    }

    #[test]
    fn burst_tokens_consumed_before_regular_quota() {
        let limiter = RateLimiter::new(tiny_config());
        assert!(limiter.check("u1").is_ok()); // burst token
        assert!(limiter.check("u1").is_ok()); // regular quota 1/2
        assert!(limiter.check("u1").is_ok()); // regular quota 2/2
        let err = limiter.check("u1").unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[test]
    fn distinct_identities_have_independent_buckets() {
        let limiter = RateLimiter::new(tiny_config());
        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u2").is_ok());
    }

    #[test]
    fn blocked_identity_reports_retry_after() {
        let limiter = RateLimiter::new(tiny_config());
        for _ in 0..3 {
            limiter.check("u1").unwrap();
        }
        let err = limiter.check("u1").unwrap_err();
        match err {
            Error::RateLimited { retry_after_secs } => assert!(retry_after_secs > 0),
            _ => panic!("expected RateLimited"),
        }
    }

    #[test]
    fn admits_at_most_requests_plus_burst_within_window() {
        let limiter = RateLimiter::new(tiny_config());
        let mut admitted = 0;
        for _ in 0..10 {
            if limiter.check("u1").is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, tiny_config().requests as usize + tiny_config().burst as usize);
    }

    #[test]
    fn cleanup_expired_is_a_noop_for_fresh_buckets() {
        let limiter = RateLimiter::new(tiny_config());
        limiter.check("u1").unwrap();
        assert_eq!(limiter.cleanup_expired(), 0);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
