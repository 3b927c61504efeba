//! Per-agent rate limiting: a counting semaphore for concurrency, strict
//! spacing, burst/per-minute sliding windows, a consecutive-failure circuit
//! breaker, and adaptive spacing adjustment (spec §4.1, component C1).

mod circuit;
mod config;
mod error;
mod limiter;

pub use circuit::CircuitState;
pub use config::{RateLimiterConfig, RateLimiterConfigBuilder};
pub use error::RateLimiterError;
pub use limiter::{RateLimitPermit, RateLimiter, RateLimiterMetrics};
