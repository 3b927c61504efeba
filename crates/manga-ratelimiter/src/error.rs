//! Errors surfaced by [`crate::RateLimiter::acquire`].

use std::time::Duration;

/// Errors from attempting to acquire a rate-limiter permit.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimiterError {
    /// The circuit is open and the cooldown has not elapsed.
    #[error("circuit breaker open")]
    CircuitBreakerOpen,
    /// The burst or per-minute cap is saturated.
    #[error("rate limit exceeded")]
    RateLimitExceeded {
        /// Best-effort hint of how long to wait before retrying.
        retry_after: Option<Duration>,
    },
}

impl From<RateLimiterError> for manga_core::CoreError {
    fn from(e: RateLimiterError) -> Self {
        match e {
            RateLimiterError::CircuitBreakerOpen => {
                manga_core::CoreError::CircuitBreakerOpen { agent: String::new() }
            }
            RateLimiterError::RateLimitExceeded { retry_after } => {
                manga_core::CoreError::RateLimitExceeded {
                    agent: String::new(),
                    retry_after,
                }
            }
        }
    }
}
