//! The per-agent rate limiter: concurrency, spacing, burst/per-minute caps,
//! circuit breaker, and adaptive spacing adjustment (spec §4.1).

use crate::circuit::{Circuit, CircuitState};
use crate::config::RateLimiterConfig;
use crate::error::RateLimiterError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Inner {
    config: RateLimiterConfig,
    circuit: Circuit,
    current_min_spacing: Duration,
    last_request_ts: Option<Instant>,
    minute_window: VecDeque<Instant>,
    burst_window: VecDeque<Instant>,
    completed_since_adjust: u32,
    successes_since_adjust: u32,
    last_adjust_at: Instant,
}

/// Rolling metrics snapshot for a single agent's rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterMetrics {
    /// Current circuit breaker state.
    pub circuit_state: CircuitState,
    /// Number of times the circuit has opened.
    pub circuit_open_count: u64,
    /// Current adaptive minimum spacing.
    pub current_min_spacing: Duration,
}

/// Per-agent rate limiter. One instance per agent name (spec §3 invariant).
pub struct RateLimiter {
    agent_name: String,
    semaphore: Mutex<Arc<Semaphore>>,
    inner: Mutex<Inner>,
}

/// Held while a request is in flight; must be consumed via [`RateLimiter::release`].
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl RateLimitPermit {
    /// When this permit was acquired, for computing elapsed call duration.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }
}

impl RateLimiter {
    /// Creates a limiter for `agent_name` with the given configuration.
    pub fn new(agent_name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let current_min_spacing = config.min_spacing;
        Self {
            agent_name: agent_name.into(),
            semaphore: Mutex::new(semaphore),
            inner: Mutex::new(Inner {
                config,
                circuit: Circuit::new(),
                current_min_spacing,
                last_request_ts: None,
                minute_window: VecDeque::new(),
                burst_window: VecDeque::new(),
                completed_since_adjust: 0,
                successes_since_adjust: 0,
                last_adjust_at: Instant::now(),
            }),
        }
    }

    /// Agent this limiter is bound to.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Replaces the live configuration. If `max_concurrent` changed, the
    /// semaphore is swapped atomically with respect to future `acquire`
    /// calls (spec §5: "updates replace the semaphore only when
    /// max_concurrent changes").
    pub fn update_config(&self, config: RateLimiterConfig) {
        let mut sem_guard = self.semaphore.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();
        if config.max_concurrent != inner.config.max_concurrent {
            *sem_guard = Arc::new(Semaphore::new(config.max_concurrent));
        }
        inner.config = config;
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> RateLimiterMetrics {
        let inner = self.inner.lock().unwrap();
        RateLimiterMetrics {
            circuit_state: inner.circuit.state(),
            circuit_open_count: inner.circuit.open_count,
            current_min_spacing: inner.current_min_spacing,
        }
    }

    /// Blocks until the caller is permitted to issue one request, or fails
    /// fast with [`RateLimiterError`].
    pub async fn acquire(&self) -> Result<RateLimitPermit, RateLimiterError> {
        let cooldown = {
            let mut inner = self.inner.lock().unwrap();
            let cooldown = inner.config.cb_cooldown;
            if inner.circuit.try_admit(cooldown).is_err() {
                return Err(RateLimiterError::CircuitBreakerOpen);
            }
            cooldown
        };
        let _ = cooldown;

        let semaphore = self.semaphore.lock().unwrap().clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("semaphore never closed");

        // Spacing: sleep until now >= last_request_ts + current_min_spacing.
        let sleep_for = {
            let inner = self.inner.lock().unwrap();
            inner.last_request_ts.and_then(|last| {
                let deadline = last + inner.current_min_spacing;
                let now = Instant::now();
                if now < deadline {
                    Some(deadline - now)
                } else {
                    None
                }
            })
        };
        if let Some(d) = sleep_for {
            tokio::time::sleep(d).await;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        // Burst check.
        while let Some(&front) = inner.burst_window.front() {
            if now.duration_since(front) > inner.config.burst_window {
                inner.burst_window.pop_front();
            } else {
                break;
            }
        }
        if inner.burst_window.len() >= inner.config.burst_limit {
            drop(inner);
            drop(permit);
            return Err(RateLimiterError::RateLimitExceeded {
                retry_after: Some(Duration::from_millis(100)),
            });
        }

        // Per-minute check over a sliding 60s window.
        while let Some(&front) = inner.minute_window.front() {
            if now.duration_since(front) > Duration::from_secs(60) {
                inner.minute_window.pop_front();
            } else {
                break;
            }
        }
        if inner.minute_window.len() >= inner.config.max_requests_per_minute {
            drop(inner);
            drop(permit);
            return Err(RateLimiterError::RateLimitExceeded {
                retry_after: Some(Duration::from_secs(1)),
            });
        }

        inner.burst_window.push_back(now);
        inner.minute_window.push_back(now);
        inner.last_request_ts = Some(now);

        Ok(RateLimitPermit {
            _permit: permit,
            acquired_at: now,
        })
    }

    /// Must be called exactly once per successful `acquire`. Records the
    /// outcome against the circuit breaker and, if enabled, adjusts spacing
    /// adaptively (spec §4.1).
    pub fn release(&self, permit: RateLimitPermit, success: bool, _elapsed: Duration) {
        drop(permit);
        let mut inner = self.inner.lock().unwrap();
        let threshold = inner.config.cb_threshold;
        if success {
            inner.circuit.record_success();
        } else {
            inner.circuit.record_failure(threshold);
        }

        if !inner.config.adaptive_enabled {
            return;
        }

        inner.completed_since_adjust += 1;
        if success {
            inner.successes_since_adjust += 1;
        }

        let enough_requests = inner.completed_since_adjust >= inner.config.min_adjust_requests;
        let enough_time = inner.last_adjust_at.elapsed() >= RateLimiterConfig::MIN_ADJUST_INTERVAL;

        if enough_requests && enough_time {
            let success_rate =
                inner.successes_since_adjust as f64 / inner.completed_since_adjust as f64;
            let step = inner.config.adjustment_step;
            if success_rate >= inner.config.success_rate_threshold {
                inner.current_min_spacing = inner
                    .current_min_spacing
                    .saturating_sub(step)
                    .max(RateLimiterConfig::MIN_SPACING_FLOOR);
            } else if success_rate < inner.config.failure_rate_threshold {
                inner.current_min_spacing = (inner.current_min_spacing + step * 2)
                    .min(RateLimiterConfig::MAX_SPACING_CEILING);
            }
            inner.completed_since_adjust = 0;
            inner.successes_since_adjust = 0;
            inner.last_adjust_at = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterConfig;

    #[tokio::test]
    async fn acquire_then_release_closes_semaphore_slot() {
        let limiter = RateLimiter::new(
            "agent",
            RateLimiterConfig::builder()
                .max_concurrent(1)
                .min_spacing(Duration::ZERO)
                .build(),
        );
        let permit = limiter.acquire().await.unwrap();
        limiter.release(permit, true, Duration::from_millis(1));
        // A second acquire should not block forever now that the slot freed up.
        let permit2 = tokio::time::timeout(Duration::from_millis(500), limiter.acquire())
            .await
            .expect("should not deadlock");
        assert!(permit2.is_ok());
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_then_recovers() {
        // S1 from spec §8.
        let limiter = RateLimiter::new(
            "x",
            RateLimiterConfig::builder()
                .cb_threshold(3)
                .cb_cooldown(Duration::from_millis(50))
                .min_spacing(Duration::ZERO)
                .max_concurrent(10)
                .adaptive_enabled(false)
                .build(),
        );

        for _ in 0..3 {
            let p = limiter.acquire().await.unwrap();
            limiter.release(p, false, Duration::from_millis(1));
        }

        assert!(matches!(
            limiter.acquire().await,
            Err(RateLimiterError::CircuitBreakerOpen)
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;

        for _ in 0..3 {
            let p = limiter
                .acquire()
                .await
                .expect("half-open should admit calls");
            limiter.release(p, true, Duration::from_millis(1));
        }

        assert_eq!(limiter.metrics().circuit_state, CircuitState::Closed);
        assert_eq!(limiter.metrics().circuit_open_count, 1);
    }

    #[tokio::test]
    async fn burst_limit_rejects_excess_requests() {
        let limiter = RateLimiter::new(
            "b",
            RateLimiterConfig::builder()
                .burst_limit(2)
                .burst_window(Duration::from_secs(10))
                .min_spacing(Duration::ZERO)
                .max_concurrent(10)
                .build(),
        );

        let p1 = limiter.acquire().await.unwrap();
        limiter.release(p1, true, Duration::from_millis(1));
        let p2 = limiter.acquire().await.unwrap();
        limiter.release(p2, true, Duration::from_millis(1));

        assert!(matches!(
            limiter.acquire().await,
            Err(RateLimiterError::RateLimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn adaptive_spacing_shrinks_on_high_success_rate() {
        // S2 from spec §8 (direction only; exact ms depend on step/threshold).
        let limiter = RateLimiter::new(
            "a",
            RateLimiterConfig::builder()
                .min_spacing(Duration::from_millis(1000))
                .adjustment_step(Duration::from_millis(100))
                .min_adjust_requests(10)
                .success_rate_threshold(0.95)
                .max_concurrent(10)
                .build(),
        );
        {
            let mut inner = limiter.inner.lock().unwrap();
            inner.last_adjust_at = Instant::now() - Duration::from_secs(31);
        }

        for _ in 0..10 {
            let p = limiter.acquire().await.unwrap();
            limiter.release(p, true, Duration::from_millis(1));
        }

        assert_eq!(
            limiter.metrics().current_min_spacing,
            Duration::from_millis(900)
        );
    }
}
