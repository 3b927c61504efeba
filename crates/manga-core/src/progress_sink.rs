//! A narrow interface agents and workers use to report progress without
//! depending on the full `manga-progress` crate (avoids a dependency
//! cycle: `manga-progress` itself depends on `manga-core`).

/// Progress reporting surface implemented by `manga_progress::ProgressTracker`.
///
/// Agents call this to tag their operations with `agent_name`/operation name
/// (spec §4.3 "progress-tracking helpers").
pub trait ProgressSink: Send + Sync {
    /// Starts a new operation, returning its id.
    fn start_operation(&self, op_type: &str, title: &str) -> String;
    /// Updates progress percentage (0-100) and/or a human step description.
    fn update_progress(&self, op_id: &str, progress: Option<f64>, step: Option<&str>);
    /// Marks the operation completed.
    fn complete_operation(&self, op_id: &str, message: Option<&str>);
    /// Marks the operation failed.
    fn fail_operation(&self, op_id: &str, error: &str);
    /// Attaches a non-fatal warning to the operation.
    fn warn_operation(&self, op_id: &str, message: &str);
}
