//! Progress events emitted by [`crate::ProgressTracker`] (spec §4.6).

use manga_core::events::CoreEvent;
use std::time::Instant;

/// The kind of progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEventKind {
    Started,
    Progress,
    Paused,
    Resumed,
    Completed,
    Failed,
    Cancelled,
    Warning,
}

impl ProgressEventKind {
    fn as_str(&self) -> &'static str {
        match self {
            ProgressEventKind::Started => "started",
            ProgressEventKind::Progress => "progress",
            ProgressEventKind::Paused => "paused",
            ProgressEventKind::Resumed => "resumed",
            ProgressEventKind::Completed => "completed",
            ProgressEventKind::Failed => "failed",
            ProgressEventKind::Cancelled => "cancelled",
            ProgressEventKind::Warning => "warning",
        }
    }

    /// The uppercase spelling used on the wire (spec §6).
    pub fn wire_str(&self) -> &'static str {
        match self {
            ProgressEventKind::Started => "STARTED",
            ProgressEventKind::Progress => "PROGRESS",
            ProgressEventKind::Paused => "PAUSED",
            ProgressEventKind::Resumed => "RESUMED",
            ProgressEventKind::Completed => "COMPLETED",
            ProgressEventKind::Failed => "FAILED",
            ProgressEventKind::Cancelled => "CANCELLED",
            ProgressEventKind::Warning => "WARNING",
        }
    }
}

/// A single emission from the progress tracker, fanned out to persistence,
/// broadcast, and in-process listeners.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub id: String,
    pub operation_id: String,
    pub operation_type: String,
    pub kind: ProgressEventKind,
    pub progress: f64,
    pub step: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub timestamp: Instant,
    pub estimated_completion: Option<Instant>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl CoreEvent for ProgressEvent {
    fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}
