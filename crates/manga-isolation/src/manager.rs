//! Bulkhead + quarantine wrapper around a single agent's calls (spec §4.2,
//! component C2). Orthogonal to [`manga_ratelimiter::RateLimiter`]'s circuit
//! breaker: both must permit a call.

use crate::config::IsolationConfig;
use crate::error::IsolationError;
use manga_core::ids::unix_timestamp_secs;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// The detected failure pattern behind a quarantine decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePattern {
    /// The call exceeded its timeout.
    TimeoutPattern,
    /// Enough recent failures accumulated to suggest a systemic issue.
    HighFailureRate,
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    at: Instant,
    pattern: FailurePattern,
}

struct Inner {
    config: IsolationConfig,
    failures: VecDeque<FailureRecord>,
    consecutive_qualifying: u32,
    quarantine_until: Option<Instant>,
    quarantine_reason: Option<FailurePattern>,
}

/// Per-agent isolation manager.
pub struct IsolationManager {
    agent_name: String,
    semaphore: Arc<Semaphore>,
    inner: Mutex<Inner>,
}

impl IsolationManager {
    /// Creates a manager for `agent_name`.
    pub fn new(agent_name: impl Into<String>, config: IsolationConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_calls));
        Self {
            agent_name: agent_name.into(),
            semaphore,
            inner: Mutex::new(Inner {
                config,
                failures: VecDeque::new(),
                consecutive_qualifying: 0,
                quarantine_until: None,
                quarantine_reason: None,
            }),
        }
    }

    /// Agent this manager is bound to.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// `true` if the agent is currently refusing all calls.
    pub fn is_quarantined(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        matches!(inner.quarantine_until, Some(until) if Instant::now() < until)
    }

    /// Explicitly clears quarantine and the recent-failure history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.quarantine_until = None;
        inner.quarantine_reason = None;
        inner.consecutive_qualifying = 0;
        inner.failures.clear();
    }

    /// Runs `f` under the bulkhead and quarantine gate, with a timeout.
    ///
    /// Steps (spec §4.2): check quarantine, acquire the bulkhead permit, run
    /// `f` with a timeout, then record success (clearing failures/quarantine)
    /// or failure (appending a tagged failure record and possibly
    /// quarantining).
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, IsolationError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let inner = self.inner.lock().unwrap();
            if let Some(until) = inner.quarantine_until {
                if Instant::now() < until {
                    return Err(IsolationError::Quarantined {
                        quarantine_until_secs: unix_timestamp_secs()
                            + until.saturating_duration_since(Instant::now()).as_secs(),
                    });
                }
            }
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed");

        let timeout = { self.inner.lock().unwrap().config.request_timeout };
        let result = tokio::time::timeout(timeout, f()).await;
        drop(permit);

        match result {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(FailurePattern::HighFailureRate);
                Err(IsolationError::Inner(e))
            }
            Err(_) => {
                self.record_failure(FailurePattern::TimeoutPattern);
                Err(IsolationError::Timeout)
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.clear();
        inner.consecutive_qualifying = 0;
        inner.quarantine_until = None;
        inner.quarantine_reason = None;
    }

    fn record_failure(&self, pattern: FailurePattern) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        let ttl = IsolationConfig::FAILURE_RECORD_TTL;
        while let Some(front) = inner.failures.front() {
            if now.duration_since(front.at) > ttl {
                inner.failures.pop_front();
            } else {
                break;
            }
        }

        inner.failures.push_back(FailureRecord { at: now, pattern });
        inner.consecutive_qualifying += 1;

        let recent_window = IsolationConfig::RECENT_FAILURE_WINDOW;
        let recent_count = inner
            .failures
            .iter()
            .filter(|r| now.duration_since(r.at) <= recent_window)
            .count() as u32;

        let consecutive_threshold = inner.config.consecutive_threshold;
        let cb_threshold = inner.config.cb_threshold;
        let quarantine_duration = inner.config.quarantine_duration;

        if inner.consecutive_qualifying >= consecutive_threshold || recent_count >= cb_threshold {
            inner.quarantine_until = Some(now + quarantine_duration);
            inner.quarantine_reason = Some(pattern);

            #[cfg(feature = "tracing")]
            tracing::warn!(agent = %self.agent_name, ?pattern, "agent quarantined");
            #[cfg(feature = "metrics")]
            metrics::counter!("isolation_quarantine_total", "agent" => self.agent_name.clone())
                .increment(1);
        }
    }

    /// The pattern that triggered the current quarantine, if any.
    pub fn quarantine_reason(&self) -> Option<FailurePattern> {
        self.inner.lock().unwrap().quarantine_reason
    }
}
