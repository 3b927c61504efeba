//! Errors surfaced by [`crate::IsolationManager::execute`].

/// Errors from the isolation manager wrapping an agent call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IsolationError<E> {
    /// The agent is currently quarantined.
    #[error("agent quarantined")]
    Quarantined {
        /// Seconds since epoch at which quarantine lifts.
        quarantine_until_secs: u64,
    },
    /// The wrapped call exceeded its timeout.
    #[error("operation timed out")]
    Timeout,
    /// The wrapped call itself failed.
    #[error("wrapped call failed")]
    Inner(E),
}
