//! The `Operation` progress node (spec §3, §4.6).

use std::time::Instant;

/// Lifecycle status of a progress operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// `true` once the operation can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::Running | OperationStatus::Paused)
    }
}

/// A node in the progress tree.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: String,
    pub op_type: String,
    pub title: String,
    pub status: OperationStatus,
    /// Percent complete, `[0, 100]`.
    pub progress: f64,
    pub processed_items: u64,
    pub successful_items: u64,
    pub failed_items: u64,
    pub total_items: Option<u64>,
    pub started_at: Instant,
    pub completed_at: Option<Instant>,
    pub estimated_completion: Option<Instant>,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub cancellable: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub current_step: Option<String>,
    pub is_bulk_operation: bool,
}

impl Operation {
    pub fn new(id: impl Into<String>, op_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            op_type: op_type.into(),
            title: title.into(),
            status: OperationStatus::Running,
            progress: 0.0,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            total_items: None,
            started_at: Instant::now(),
            completed_at: None,
            estimated_completion: None,
            parent_id: None,
            child_ids: Vec::new(),
            user_id: None,
            session_id: None,
            cancellable: true,
            warnings: Vec::new(),
            error: None,
            current_step: None,
            is_bulk_operation: false,
        }
    }
}
