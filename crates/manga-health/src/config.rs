//! Health monitor configuration (spec §4.5).

use std::time::Duration;

/// Tunables for [`crate::HealthMonitor`]'s scheduled checks and thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMonitorConfig {
    /// Cadence of basic scheduled checks.
    pub check_interval: Duration,
    /// Cadence of the heavier performance-benchmark check.
    pub performance_check_interval: Duration,
    /// Consecutive failures that auto-disable a provider.
    pub failure_threshold: u32,
    /// Consecutive failures that mark a provider degraded.
    pub degraded_threshold: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            performance_check_interval: Duration::from_secs(3600),
            failure_threshold: 5,
            degraded_threshold: 3,
        }
    }
}
