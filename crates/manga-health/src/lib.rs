//! Scheduled agent health checks, rolling health metrics, and health-score
//! based provider ranking (spec §4.5, component C5).

mod config;
mod metrics;
mod monitor;

pub use config::HealthMonitorConfig;
pub use metrics::{CheckRecord, HealthMetrics, HealthStatus};
pub use monitor::{HealthMonitor, HealthSummary};
