//! The persistence hook progress operations/events are offered to. No
//! concrete database implementation ships here (out of scope per §1); this
//! is the narrow trait shape, grounded on
//! `progress/persistence.py::ProgressPersistenceService`.

use crate::events::ProgressEvent;
use crate::operation::Operation;
use async_trait::async_trait;

/// Counts returned by a cleanup pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    pub operations_deleted: u64,
    pub events_deleted: u64,
}

/// A best-effort sink for durable storage of operations and events.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save_operation(&self, operation: &Operation) -> bool;
    async fn save_event(&self, event: &ProgressEvent) -> bool;
    async fn cleanup_old_data(&self) -> CleanupStats;
}
