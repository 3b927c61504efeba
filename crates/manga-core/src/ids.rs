//! Id and time helpers shared across the workspace.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generates a new random id for operations, jobs, and WebSocket connections.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time as seconds since the Unix epoch, used when
/// serializing timestamps over the WebSocket protocol (spec §6) or
/// persisting quarantine/circuit deadlines.
pub fn unix_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current wall-clock time in RFC3339, for event payloads that round-trip
/// through JSON (spec §8, invariant 11).
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn timestamp_is_monotonic_non_decreasing() {
        let a = unix_timestamp_secs();
        let b = unix_timestamp_secs();
        assert!(b >= a);
    }
}
