//! Retry with exponential backoff + jitter, a three-state circuit
//! breaker, and `FaultCore::execute` which composes both around any
//! async operation. Grounded on the same two primitives used
//! elsewhere in this codebase's fault handling, generalised from a
//! single global handler to one reusable across every dependency.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use choir_domain::error::{Error, Result};
use choir_domain::config::{BreakerConfig, RetryConfig};
use parking_lot::RwLock;
use rand::Rng;

/// Re-exported under a fault-specific name; the shape matches
/// [`choir_domain::config::RetryConfig`] but this is the primitive the
/// engine actually consumes.
pub type RetryPolicy = RetryConfig;

fn calculate_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let raw = policy.base_delay_secs * policy.exponential_base.powi(attempt as i32);
    let mut delay = raw.min(policy.max_delay_secs);
    if policy.jitter {
        let jitter_range = delay * 0.1;
        let mut rng = rand::thread_rng();
        delay += rng.gen_range(-jitter_range..=jitter_range);
    }
    Duration::from_secs_f64(delay.max(0.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    state_changed_at: DateTime<Utc>,
}

/// Per-dependency circuit breaker. `Closed → Open` after
/// `failure_threshold` consecutive failures; `Open → HalfOpen` after
/// `timeout_secs`; `HalfOpen → Closed` after `success_threshold`
/// consecutive successes; any failure in `HalfOpen` reopens it.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                state_changed_at: Utc::now(),
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }

    /// Returns `Err(CircuitOpen)` if calls should short-circuit; may
    /// transition `Open → HalfOpen` as a side effect once the timeout
    /// has elapsed.
    pub fn check(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state == BreakerState::Open {
            let elapsed = (Utc::now() - inner.state_changed_at).num_milliseconds() as f64 / 1000.0;
            if elapsed >= self.config.timeout_secs {
                inner.state = BreakerState::HalfOpen;
                inner.state_changed_at = Utc::now();
                inner.success_count = 0;
                tracing::info!(breaker = %self.name, "circuit entering half-open state for testing");
            } else {
                return Err(Error::CircuitOpen { name: self.name.clone() });
            }
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.state_changed_at = Utc::now();
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    tracing::info!(breaker = %self.name, "circuit closed, service recovered");
                }
            }
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write();
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.state_changed_at = Utc::now();
                inner.success_count = 0;
                tracing::warn!(breaker = %self.name, "circuit reopened during half-open probe");
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.state_changed_at = Utc::now();
                    inner.success_count = 0;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        timeout_secs = self.config.timeout_secs,
                        "circuit opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Rolling 24-hour error count per operation name, for the
/// observability contract (`/statistics`). Entries older than 24h are
/// pruned on each record.
struct ErrorStats {
    timestamps: HashMap<String, Vec<DateTime<Utc>>>,
}

impl ErrorStats {
    fn new() -> Self {
        Self {
            timestamps: HashMap::new(),
        }
    }

    fn record(&mut self, operation: &str) {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::hours(24);
        let entry = self.timestamps.entry(operation.to_string()).or_default();
        entry.push(now);
        entry.retain(|t| *t > cutoff);
    }

    fn rate_per_hour(&self, operation: &str, window_hours: i64) -> f64 {
        let Some(entries) = self.timestamps.get(operation) else {
            return 0.0;
        };
        let cutoff = Utc::now() - chrono::Duration::hours(window_hours);
        let recent = entries.iter().filter(|t| **t > cutoff).count();
        recent as f64 / window_hours.max(1) as f64
    }
}

/// Owns every named circuit breaker and the rolling error-rate table;
/// `execute` composes retry + breaker around an arbitrary async
/// operation.
pub struct FaultCore {
    breakers: RwLock<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
    default_breaker_config: BreakerConfig,
    error_stats: RwLock<ErrorStats>,
}

impl FaultCore {
    pub fn new(default_breaker_config: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_breaker_config,
            error_stats: RwLock::new(ErrorStats::new()),
        }
    }

    pub fn breaker(&self, name: &str) -> std::sync::Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().get(name) {
            return std::sync::Arc::clone(b);
        }
        let mut breakers = self.breakers.write();
        std::sync::Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(name, self.default_breaker_config.clone()))),
        )
    }

    /// Run `op` with retry + optional circuit breaker. `op` is called
    /// again on each attempt, so it must be re-invocable (typically a
    /// closure capturing cheaply-cloneable state).
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        breaker_name: Option<&str>,
        retry: &RetryPolicy,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = breaker_name.map(|n| self.breaker(n));

        let mut last_err = None;
        for attempt in 0..retry.max_attempts {
            if let Some(b) = &breaker {
                if let Err(e) = b.check() {
                    return Err(e);
                }
            }

            match op().await {
                Ok(value) => {
                    if let Some(b) = &breaker {
                        b.record_success();
                    }
                    if attempt > 0 {
                        tracing::info!(operation = operation_name, attempt = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if let Some(b) = &breaker {
                        b.record_failure();
                    }
                    self.error_stats.write().record(operation_name);

                    let retryable = e.is_retryable();
                    let is_last = attempt + 1 == retry.max_attempts;
                    if !retryable || is_last {
                        tracing::error!(operation = operation_name, attempt = attempt + 1, error = %e, "operation failed");
                        last_err = Some(e);
                        break;
                    }
                    let delay = calculate_delay(attempt, retry);
                    tracing::warn!(operation = operation_name, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::dependency(operation_name, "exhausted retries with no recorded error")))
    }

    pub fn error_rate(&self, operation_name: &str, window_hours: i64) -> f64 {
        self.error_stats.read().rate_per_hour(operation_name, window_hours)
    }

    /// Current state of every breaker that has been touched at least
    /// once, for the detailed health endpoint's component table.
    pub fn breaker_snapshot(&self) -> Vec<(String, BreakerState)> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_secs: 0.001,
            max_delay_secs: 0.01,
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let core = FaultCore::new(BreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result = core
            .execute("op", None, &fast_retry(), || {
                let calls2 = Arc::clone(&calls2);
                async move {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_up_to_max_attempts() {
        let core = FaultCore::new(BreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result: Result<i32> = core
            .execute("op", None, &fast_retry(), || {
                let calls2 = Arc::clone(&calls2);
                async move {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    Err(Error::dependency("x", "boom"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let core = FaultCore::new(BreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result: Result<i32> = core
            .execute("op", None, &fast_retry(), || {
                let calls2 = Arc::clone(&calls2);
                async move {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Validation("bad input".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 2,
                timeout_secs: 60.0,
                success_threshold: 1,
            },
        );
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn breaker_half_open_then_closed_on_success() {
        let breaker = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 1,
                timeout_secs: 0.0,
                success_threshold: 1,
            },
        );
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        // timeout_secs=0 means check() immediately transitions to half-open.
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn breaker_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 1,
                timeout_secs: 0.0,
                success_threshold: 2,
            },
        );
        breaker.record_failure();
        breaker.check().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn success_in_closed_resets_failure_count() {
        let breaker = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 3,
                timeout_secs: 60.0,
                success_threshold: 1,
            },
        );
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn error_rate_tracks_recorded_failures() {
        let core = FaultCore::new(BreakerConfig::default());
        core.error_stats.write().record("op");
        core.error_stats.write().record("op");
        assert_eq!(core.error_rate("op", 1), 2.0);
        assert_eq!(core.error_rate("unknown", 1), 0.0);
    }
}
