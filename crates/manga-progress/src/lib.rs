//! Hierarchical progress tracking with WebSocket broadcast, grounded on
//! `app/core/progress/*`.

mod broadcaster;
mod events;
mod operation;
mod persistence;
mod tracker;
mod wire;

pub use broadcaster::WebSocketBroadcaster;
pub use events::{ProgressEvent, ProgressEventKind};
pub use operation::{Operation, OperationStatus};
pub use persistence::{CleanupStats, PersistenceSink};
pub use tracker::{OperationFilter, ProgressTracker, ProgressTrackerBuilder};
pub use wire::{ClientMessage, ProgressEventPayload, ServerMessage};
