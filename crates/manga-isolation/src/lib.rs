//! Per-agent bulkhead isolation with failure-pattern quarantine, orthogonal
//! to the rate limiter's circuit breaker (spec §4.2, component C2).

mod config;
mod error;
mod manager;

pub use config::{IsolationConfig, IsolationConfigBuilder};
pub use error::IsolationError;
pub use manager::{FailurePattern, IsolationManager};
