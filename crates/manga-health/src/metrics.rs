//! Per-provider health metrics: EMA response time, rolling success rate,
//! status transitions, and the health-score ranking formula (spec §4.5,
//! grounded on `agents/monitoring.py` / `jobs/health_monitor.py`).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Health status of a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
    Disabled,
}

/// One entry in a provider's bounded recent-check ring.
#[derive(Debug, Clone)]
pub struct CheckRecord {
    pub at: Instant,
    pub success: bool,
    pub response_time: Option<Duration>,
    pub error: Option<String>,
}

/// Bound on the recent-checks ring (spec §3: "bounded ring of recent
/// checks (≤10)").
const RECENT_CHECKS_CAP: usize = 10;

/// Rolling health state for one provider.
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    pub provider_name: String,
    pub status: HealthStatus,
    pub last_check: Option<Instant>,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub avg_response_time: Duration,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub recent_checks: VecDeque<CheckRecord>,
    pub status_changed_at: Option<Instant>,
    pub auto_disabled: bool,
    pub manual_override: bool,
    degraded_threshold: u32,
    failure_threshold: u32,
}

impl HealthMetrics {
    pub fn new(provider_name: impl Into<String>, degraded_threshold: u32, failure_threshold: u32) -> Self {
        Self {
            provider_name: provider_name.into(),
            status: HealthStatus::Unknown,
            last_check: None,
            last_success: None,
            last_failure: None,
            avg_response_time: Duration::ZERO,
            success_rate: 0.0,
            consecutive_failures: 0,
            total_failures: 0,
            total_successes: 0,
            recent_checks: VecDeque::new(),
            status_changed_at: None,
            auto_disabled: false,
            manual_override: false,
            degraded_threshold,
            failure_threshold,
        }
    }

    fn push_record(&mut self, record: CheckRecord) {
        self.recent_checks.push_back(record);
        while self.recent_checks.len() > RECENT_CHECKS_CAP {
            self.recent_checks.pop_front();
        }
    }

    fn recompute_success_rate(&mut self) {
        let total = self.total_successes + self.total_failures;
        if total > 0 {
            self.success_rate = (self.total_successes as f64 / total as f64) * 100.0;
        }
    }

    /// Records a successful check: EMA response time (`0.8·avg + 0.2·sample`,
    /// seeded by the first sample), zeroed consecutive failures.
    pub fn record_success(&mut self, response_time: Duration) {
        let now = Instant::now();
        self.last_check = Some(now);
        self.last_success = Some(now);
        self.consecutive_failures = 0;
        self.total_successes += 1;
        self.avg_response_time = if self.avg_response_time.is_zero() {
            response_time
        } else {
            let avg = self.avg_response_time.as_secs_f64() * 0.8 + response_time.as_secs_f64() * 0.2;
            Duration::from_secs_f64(avg)
        };
        self.recompute_success_rate();
        self.push_record(CheckRecord {
            at: now,
            success: true,
            response_time: Some(response_time),
            error: None,
        });
        self.update_status();
    }

    /// Records a failed check.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        let now = Instant::now();
        let error = error.into();
        self.last_check = Some(now);
        self.last_failure = Some(now);
        self.consecutive_failures += 1;
        self.total_failures += 1;
        self.recompute_success_rate();
        self.push_record(CheckRecord {
            at: now,
            success: false,
            response_time: None,
            error: Some(error),
        });
        self.update_status();
    }

    /// Recomputes `status` from current metrics unless manually overridden
    /// (spec §4.5 status transitions).
    fn update_status(&mut self) {
        if self.manual_override {
            return;
        }

        let total_checks = self.total_successes + self.total_failures;
        let new_status = if self.consecutive_failures >= self.failure_threshold {
            HealthStatus::Unhealthy
        } else if self.consecutive_failures >= self.degraded_threshold
            || (self.success_rate < 80.0 && total_checks >= 10)
        {
            HealthStatus::Degraded
        } else if self.success_rate >= 95.0 || self.consecutive_failures == 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        if new_status != self.status {
            self.status = new_status;
            self.status_changed_at = Some(Instant::now());
        }
    }

    /// Health score for ranking, `[0, 100]` (spec §4.5).
    pub fn health_score(&self) -> f64 {
        if self.status == HealthStatus::Disabled {
            return 0.0;
        }

        let mut score = self.success_rate;
        score -= (self.consecutive_failures as f64 * 10.0).min(50.0);

        if let Some(last_success) = self.last_success {
            if last_success.elapsed() < Duration::from_secs(3600) {
                score += 10.0;
            }
        }

        if !self.avg_response_time.is_zero() {
            if self.avg_response_time < Duration::from_secs(1) {
                score += 5.0;
            } else if self.avg_response_time > Duration::from_secs(5) {
                score -= 10.0;
            }
        }

        score.clamp(0.0, 100.0)
    }

    /// Disables the provider, optionally flagging it as auto-disabled due to
    /// too many consecutive failures.
    pub fn disable(&mut self, auto: bool) {
        self.status = HealthStatus::Disabled;
        self.status_changed_at = Some(Instant::now());
        self.auto_disabled = auto;
    }

    /// Re-enables the provider: resets counters and clears overrides, ready
    /// for an immediate re-check.
    pub fn enable(&mut self) {
        self.consecutive_failures = 0;
        self.auto_disabled = false;
        self.manual_override = false;
        self.status = HealthStatus::Unknown;
        self.status_changed_at = Some(Instant::now());
    }
}
