//! Isolation manager configuration (spec §4.2).

use std::time::Duration;

/// Configuration for a single agent's bulkhead + quarantine.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationConfig {
    /// Bulkhead concurrency cap, independent of the rate limiter's.
    pub max_concurrent_calls: usize,
    /// Per-call timeout enforced while wrapped (spec §5 default 30s).
    pub request_timeout: Duration,
    /// Consecutive qualifying failures before quarantining.
    pub consecutive_threshold: u32,
    /// Recent-failure count (within 10 min) that also triggers quarantine.
    pub cb_threshold: u32,
    /// How long quarantine lasts once triggered.
    pub quarantine_duration: Duration,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
            request_timeout: Duration::from_secs(30),
            consecutive_threshold: 3,
            cb_threshold: 5,
            quarantine_duration: Duration::from_secs(300),
        }
    }
}

impl IsolationConfig {
    /// Window over which recent failures qualify toward quarantine.
    pub const RECENT_FAILURE_WINDOW: Duration = Duration::from_secs(600);
    /// Age past which a failure record is pruned entirely.
    pub const FAILURE_RECORD_TTL: Duration = Duration::from_secs(3600);

    /// Starts a builder seeded with defaults.
    pub fn builder() -> IsolationConfigBuilder {
        IsolationConfigBuilder(Self::default())
    }
}

/// Builder for [`IsolationConfig`].
#[derive(Debug, Clone)]
pub struct IsolationConfigBuilder(IsolationConfig);

impl IsolationConfigBuilder {
    /// Sets the bulkhead concurrency cap.
    pub fn max_concurrent_calls(mut self, v: usize) -> Self {
        self.0.max_concurrent_calls = v;
        self
    }
    /// Sets the per-call timeout.
    pub fn request_timeout(mut self, v: Duration) -> Self {
        self.0.request_timeout = v;
        self
    }
    /// Sets the consecutive-failure quarantine threshold.
    pub fn consecutive_threshold(mut self, v: u32) -> Self {
        self.0.consecutive_threshold = v;
        self
    }
    /// Sets the recent-failure-count quarantine threshold.
    pub fn cb_threshold(mut self, v: u32) -> Self {
        self.0.cb_threshold = v;
        self
    }
    /// Sets the quarantine duration.
    pub fn quarantine_duration(mut self, v: Duration) -> Self {
        self.0.quarantine_duration = v;
        self
    }
    /// Builds the configuration.
    pub fn build(self) -> IsolationConfig {
        self.0
    }
}
