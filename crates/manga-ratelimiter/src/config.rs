//! Per-agent rate limiter configuration, loaded at startup and hot-swappable
//! (spec §4.1, §6 `agent_runtime_config.json`).

use std::time::Duration;

/// Configuration for a single agent's [`crate::RateLimiter`].
///
/// Defaults are conservative, matching `spec.md` §4.1: 2 concurrent, 1 s
/// spacing, 60/min, burst 5.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum simultaneous in-flight requests.
    pub max_concurrent: usize,
    /// Minimum time between two admitted requests.
    pub min_spacing: Duration,
    /// Maximum requests admitted in a sliding 60s window.
    pub max_requests_per_minute: usize,
    /// Maximum requests admitted within `burst_window`.
    pub burst_limit: usize,
    /// Window over which `burst_limit` is enforced.
    pub burst_window: Duration,
    /// Consecutive failures required to open the circuit.
    pub cb_threshold: u32,
    /// How long the circuit stays open before trying half-open.
    pub cb_cooldown: Duration,
    /// Whether adaptive spacing adjustment is enabled.
    pub adaptive_enabled: bool,
    /// Success rate at/above which spacing shrinks.
    pub success_rate_threshold: f64,
    /// Success rate below which spacing grows.
    pub failure_rate_threshold: f64,
    /// Spacing adjustment step.
    pub adjustment_step: Duration,
    /// Minimum completed requests since the last adjustment before adjusting again.
    pub min_adjust_requests: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            min_spacing: Duration::from_millis(1000),
            max_requests_per_minute: 60,
            burst_limit: 5,
            burst_window: Duration::from_secs(1),
            cb_threshold: 5,
            cb_cooldown: Duration::from_secs(300),
            adaptive_enabled: true,
            success_rate_threshold: 0.95,
            failure_rate_threshold: 0.8,
            adjustment_step: Duration::from_millis(100),
            min_adjust_requests: 10,
        }
    }
}

impl RateLimiterConfig {
    /// Starts a builder seeded with the conservative defaults.
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::default()
    }

    /// Floor for adaptive spacing shrink (spec §4.1: "floor 200ms").
    pub const MIN_SPACING_FLOOR: Duration = Duration::from_millis(200);
    /// Ceiling for adaptive spacing growth (spec §4.1: "ceiling 10s").
    pub const MAX_SPACING_CEILING: Duration = Duration::from_secs(10);
    /// Minimum elapsed time between two adaptive adjustments.
    pub const MIN_ADJUST_INTERVAL: Duration = Duration::from_secs(30);
}

/// Builder for [`RateLimiterConfig`].
#[derive(Debug, Clone, Default)]
pub struct RateLimiterConfigBuilder {
    inner: OptionalConfig,
}

#[derive(Debug, Clone, Default)]
struct OptionalConfig {
    max_concurrent: Option<usize>,
    min_spacing: Option<Duration>,
    max_requests_per_minute: Option<usize>,
    burst_limit: Option<usize>,
    burst_window: Option<Duration>,
    cb_threshold: Option<u32>,
    cb_cooldown: Option<Duration>,
    adaptive_enabled: Option<bool>,
    success_rate_threshold: Option<f64>,
    failure_rate_threshold: Option<f64>,
    adjustment_step: Option<Duration>,
    min_adjust_requests: Option<u32>,
}

macro_rules! builder_field {
    ($name:ident, $ty:ty) => {
        /// Overrides this field; unset fields keep the conservative default.
        pub fn $name(mut self, value: $ty) -> Self {
            self.inner.$name = Some(value);
            self
        }
    };
}

impl RateLimiterConfigBuilder {
    builder_field!(max_concurrent, usize);
    builder_field!(min_spacing, Duration);
    builder_field!(max_requests_per_minute, usize);
    builder_field!(burst_limit, usize);
    builder_field!(burst_window, Duration);
    builder_field!(cb_threshold, u32);
    builder_field!(cb_cooldown, Duration);
    builder_field!(adaptive_enabled, bool);
    builder_field!(success_rate_threshold, f64);
    builder_field!(failure_rate_threshold, f64);
    builder_field!(adjustment_step, Duration);
    builder_field!(min_adjust_requests, u32);

    /// Builds the final configuration, falling back to defaults for unset fields.
    pub fn build(self) -> RateLimiterConfig {
        let d = RateLimiterConfig::default();
        RateLimiterConfig {
            max_concurrent: self.inner.max_concurrent.unwrap_or(d.max_concurrent),
            min_spacing: self.inner.min_spacing.unwrap_or(d.min_spacing),
            max_requests_per_minute: self
                .inner
                .max_requests_per_minute
                .unwrap_or(d.max_requests_per_minute),
            burst_limit: self.inner.burst_limit.unwrap_or(d.burst_limit),
            burst_window: self.inner.burst_window.unwrap_or(d.burst_window),
            cb_threshold: self.inner.cb_threshold.unwrap_or(d.cb_threshold),
            cb_cooldown: self.inner.cb_cooldown.unwrap_or(d.cb_cooldown),
            adaptive_enabled: self.inner.adaptive_enabled.unwrap_or(d.adaptive_enabled),
            success_rate_threshold: self
                .inner
                .success_rate_threshold
                .unwrap_or(d.success_rate_threshold),
            failure_rate_threshold: self
                .inner
                .failure_rate_threshold
                .unwrap_or(d.failure_rate_threshold),
            adjustment_step: self.inner.adjustment_step.unwrap_or(d.adjustment_step),
            min_adjust_requests: self
                .inner
                .min_adjust_requests
                .unwrap_or(d.min_adjust_requests),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = RateLimiterConfig::default();
        assert_eq!(c.max_concurrent, 2);
        assert_eq!(c.min_spacing, Duration::from_secs(1));
        assert_eq!(c.max_requests_per_minute, 60);
        assert_eq!(c.burst_limit, 5);
    }

    #[test]
    fn builder_overrides_only_set_fields() {
        let c = RateLimiterConfig::builder().max_concurrent(10).build();
        assert_eq!(c.max_concurrent, 10);
        assert_eq!(c.burst_limit, 5);
    }
}
