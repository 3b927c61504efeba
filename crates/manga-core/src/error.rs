//! The error kinds shared by every layer of the federated provider core.
//!
//! [`CoreError`] is the language-neutral error kind set from the spec's
//! error-handling design: rate-limit/isolation refusals are transient and
//! handled by the caller without touching the circuit, provider errors are
//! wrapped with operation context, and cancellation is never converted into
//! a failure.

use std::fmt;
use std::time::Duration;

/// Unified error kind for agent calls, job execution, and federated search.
///
/// Mirrors `spec.md` §7. Transient kinds (`CircuitBreakerOpen`,
/// `RateLimitExceeded`, `AgentQuarantined`) are recorded as throttles rather
/// than failures by the caller; `Cancelled` is never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// The agent's rate-limiter circuit is open and the cooldown has not elapsed.
    #[error("circuit breaker open for agent '{agent}'")]
    CircuitBreakerOpen {
        /// Name of the agent whose circuit is open.
        agent: String,
    },

    /// The per-minute or burst cap is saturated.
    #[error("rate limit exceeded for agent '{agent}'")]
    RateLimitExceeded {
        /// Name of the agent that was rate limited.
        agent: String,
        /// Suggested backoff before retrying, if known.
        retry_after: Option<Duration>,
    },

    /// The isolation manager has quarantined this agent.
    #[error("agent '{agent}' is quarantined until {quarantine_until_secs}s from epoch")]
    AgentQuarantined {
        /// Name of the quarantined agent.
        agent: String,
        /// Quarantine expiry, as seconds since `UNIX_EPOCH`.
        quarantine_until_secs: u64,
    },

    /// A per-call deadline elapsed.
    #[error("operation timed out after {0:?}")]
    OperationTimeout(Duration),

    /// The upstream provider raised an error.
    #[error("upstream error in '{context}': {message}")]
    UpstreamError {
        /// Where the error occurred (e.g. "search", "download_page").
        context: String,
        /// Human-readable message from the provider.
        message: String,
    },

    /// The referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad configuration or arguments.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Cooperative cancellation. Never retried, never treated as a failure.
    #[error("cancelled")]
    Cancelled,
}

impl CoreError {
    /// `true` for kinds the caller should treat as transient throttles
    /// rather than provider failures (spec §7 propagation policy).
    pub fn is_throttle(&self) -> bool {
        matches!(
            self,
            CoreError::CircuitBreakerOpen { .. }
                | CoreError::RateLimitExceeded { .. }
                | CoreError::AgentQuarantined { .. }
        )
    }

    /// `true` if this is cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    /// A short human-readable message suitable for surfacing on a failed
    /// job or operation (spec §7 "human-readable error message").
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// Convenience alias used throughout the workspace.
pub type CoreResult<T> = Result<T, CoreError>;

/// A unified wrapper composing a layer-specific error with an opaque
/// application error, so that composed resilience layers (rate limiter +
/// isolation + provider) need no per-pair `From` impls.
///
/// Grounded on `tower_resilience_core::error::ResilienceError<E>`.
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// A resilience layer refused or timed out the call.
    Core(CoreError),
    /// The wrapped provider/application call itself failed.
    Application(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResilienceError::Core(e) => write!(f, "{e}"),
            ResilienceError::Application(e) => write!(f, "application error: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ResilienceError<E> {}

impl<E> From<CoreError> for ResilienceError<E> {
    fn from(e: CoreError) -> Self {
        ResilienceError::Core(e)
    }
}

impl<E> ResilienceError<E> {
    /// Extracts the application error, if this is an `Application` variant.
    pub fn application_error(self) -> Option<E> {
        match self {
            ResilienceError::Application(e) => Some(e),
            _ => None,
        }
    }

    /// `true` if the underlying `CoreError` is a throttle kind.
    pub fn is_throttle(&self) -> bool {
        matches!(self, ResilienceError::Core(e) if e.is_throttle())
    }
}
