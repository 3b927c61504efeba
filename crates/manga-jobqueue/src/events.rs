//! Job lifecycle events, grounded on `jobs/events.py::JobEvent`.

use manga_core::events::CoreEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    Queued,
    Started,
    Progress,
    Paused,
    Resumed,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobEventKind {
    fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Queued => "queued",
            JobEventKind::Started => "started",
            JobEventKind::Progress => "progress",
            JobEventKind::Paused => "paused",
            JobEventKind::Resumed => "resumed",
            JobEventKind::Completed => "completed",
            JobEventKind::Failed => "failed",
            JobEventKind::Cancelled => "cancelled",
            JobEventKind::Retrying => "retrying",
        }
    }
}

/// A single job lifecycle event, fanned out to in-process listeners.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: String,
    pub job_type: &'static str,
    pub kind: JobEventKind,
    pub message: String,
    pub progress: f64,
    pub items_processed: u64,
    pub items_total: Option<u64>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl CoreEvent for JobEvent {
    fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}
