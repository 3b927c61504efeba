//! The per-agent circuit breaker embedded in the rate limiter (spec §4.1).

use std::time::{Duration, Instant};

/// Circuit breaker state (spec §3 `RateLimiterState.circuit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls are admitted.
    Closed,
    /// Calls are refused until the cooldown elapses.
    Open,
    /// A limited number of calls are admitted to probe recovery.
    HalfOpen,
}

/// Consecutive-success threshold to close the circuit from half-open
/// (spec §4.1: "three consecutive successes transition to CLOSED").
const HALF_OPEN_SUCCESSES_TO_CLOSE: u32 = 3;

#[derive(Debug)]
pub(crate) struct Circuit {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    pub(crate) open_count: u64,
}

impl Circuit {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            open_count: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    /// Returns `Ok(())` if a call may proceed, `Err(())` if the circuit
    /// refuses it. Transitions OPEN -> HALF_OPEN as a side effect when the
    /// cooldown has elapsed.
    pub(crate) fn try_admit(&mut self, cooldown: Duration) -> Result<(), ()> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                    self.consecutive_failures = 0;
                    Ok(())
                } else {
                    Err(())
                }
            }
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
        match self.state {
            CircuitState::HalfOpen => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= HALF_OPEN_SUCCESSES_TO_CLOSE {
                    self.close();
                }
            }
            _ => {}
        }
    }

    pub(crate) fn record_failure(&mut self, threshold: u32) {
        self.consecutive_successes = 0;
        match self.state {
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= threshold {
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.open_count += 1;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }
}
