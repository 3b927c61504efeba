//! The central progress tracking service, grounded on
//! `progress/tracker.py::ProgressTracker`.
//!
//! [`manga_core::ProgressSink`] is a synchronous, narrow trait so agents can
//! report progress without an `.await`. The tracker therefore fires its
//! async side effects (persistence, broadcast) on a spawned task; the
//! in-process listener fan-out runs inline since it is itself synchronous.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use manga_core::events::EventListeners;
use manga_core::ProgressSink;
use tokio::task::JoinHandle;

use crate::broadcaster::WebSocketBroadcaster;
use crate::events::{ProgressEvent, ProgressEventKind};
use crate::operation::{Operation, OperationStatus};
use crate::persistence::PersistenceSink;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_COMPLETED_OPERATIONS: usize = 100;

/// Optional filters for [`ProgressTracker::get_operations`].
#[derive(Debug, Clone, Default)]
pub struct OperationFilter<'a> {
    pub user_id: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub op_type: Option<&'a str>,
    pub status: Option<OperationStatus>,
    pub active_only: bool,
}

struct Inner {
    operations: Mutex<HashMap<String, Operation>>,
    listeners: Mutex<EventListeners<ProgressEvent>>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    broadcaster: Option<Arc<WebSocketBroadcaster>>,
    max_completed_operations: usize,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

/// Tracks operation trees and fans each emission out to persistence,
/// WebSocket broadcast, and in-process listeners (spec §4.6).
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ProgressTrackerBuilder {
        ProgressTrackerBuilder::default()
    }

    /// Registers an in-process listener for every emitted event.
    pub fn add_listener<L>(&self, listener: L)
    where
        L: manga_core::events::EventListener<ProgressEvent> + 'static,
    {
        self.inner.listeners.lock().unwrap().add(listener);
    }

    /// Starts the hourly janitor that trims finished operations beyond
    /// `max_completed_operations`. Idempotent.
    pub fn start_cleanup_task(&self) {
        let mut guard = self.inner.cleanup_task.lock().unwrap();
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let this = self.clone();
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_INTERVAL).await;
                this.cleanup_old_operations();
            }
        }));
    }

    pub fn stop_cleanup_task(&self) {
        if let Some(handle) = self.inner.cleanup_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn cleanup_old_operations(&self) {
        let mut operations = self.inner.operations.lock().unwrap();
        let mut finished: Vec<(String, Option<Instant>)> = operations
            .values()
            .filter(|op| op.status.is_terminal())
            .map(|op| (op.id.clone(), op.completed_at))
            .collect();

        if finished.len() <= self.inner.max_completed_operations {
            return;
        }

        finished.sort_by_key(|(_, completed_at)| *completed_at);
        let to_remove = finished.len() - self.inner.max_completed_operations;
        for (id, _) in finished.into_iter().take(to_remove) {
            operations.remove(&id);
        }
    }

    pub fn get_operation(&self, operation_id: &str) -> Option<Operation> {
        self.inner.operations.lock().unwrap().get(operation_id).cloned()
    }

    pub fn get_operations(&self, filter: OperationFilter<'_>) -> Vec<Operation> {
        let operations = self.inner.operations.lock().unwrap();
        let mut out: Vec<Operation> = operations
            .values()
            .filter(|op| filter.user_id.map_or(true, |u| op.user_id.as_deref() == Some(u)))
            .filter(|op| filter.session_id.map_or(true, |s| op.session_id.as_deref() == Some(s)))
            .filter(|op| filter.op_type.map_or(true, |t| op.op_type == t))
            .filter(|op| filter.status.map_or(true, |s| op.status == s))
            .filter(|op| !filter.active_only || op.status.is_active())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }

    /// Full-fidelity operation start, exposed beyond the narrow
    /// [`ProgressSink`] surface for callers that need hierarchy, totals, or
    /// non-cancellable operations.
    #[allow(clippy::too_many_arguments)]
    pub fn start_operation_full(
        &self,
        op_type: &str,
        title: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
        parent_id: Option<&str>,
        total_items: Option<u64>,
        cancellable: bool,
    ) -> String {
        let id = manga_core::ids::new_id();
        let mut op = Operation::new(id.clone(), op_type, title);
        op.user_id = user_id.map(str::to_string);
        op.session_id = session_id.map(str::to_string);
        op.parent_id = parent_id.map(str::to_string);
        op.total_items = total_items;
        op.cancellable = cancellable;

        {
            let mut operations = self.inner.operations.lock().unwrap();
            if let Some(parent_id) = parent_id {
                if let Some(parent) = operations.get_mut(parent_id) {
                    parent.child_ids.push(id.clone());
                }
            }
            operations.insert(id.clone(), op);
        }

        self.emit(
            &id,
            ProgressEventKind::Started,
            0.0,
            None,
            Some(format!("Started: {title}")),
            None,
            None,
        );
        id
    }

    pub fn update_progress_full(
        &self,
        operation_id: &str,
        progress: Option<f64>,
        step: Option<&str>,
        message: Option<&str>,
        processed_items: Option<u64>,
        successful_items: Option<u64>,
        failed_items: Option<u64>,
    ) -> bool {
        let (actual_progress, op_type) = {
            let mut operations = self.inner.operations.lock().unwrap();
            let Some(op) = operations.get_mut(operation_id) else {
                return false;
            };
            if let Some(p) = progress {
                op.progress = p.clamp(0.0, 100.0);
            }
            if let Some(step) = step {
                op.current_step = Some(step.to_string());
            }
            if let Some(v) = processed_items {
                op.processed_items = v;
            }
            if let Some(v) = successful_items {
                op.successful_items = v;
            }
            if let Some(v) = failed_items {
                op.failed_items = v;
            }
            if let Some(total) = op.total_items {
                if total > 0 {
                    op.progress = (op.processed_items as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
                }
            }
            if op.progress > 0.0 {
                let elapsed = op.started_at.elapsed();
                let eta_secs = elapsed.as_secs_f64() * (100.0 / op.progress - 1.0);
                op.estimated_completion = Some(Instant::now() + Duration::from_secs_f64(eta_secs.max(0.0)));
            }
            (op.progress, op.op_type.clone())
        };

        self.emit(
            operation_id,
            ProgressEventKind::Progress,
            actual_progress,
            step.map(str::to_string),
            Some(message.map(str::to_string).unwrap_or_else(|| format!("Progress: {actual_progress:.1}%"))),
            None,
            None,
        );
        let _ = op_type;
        true
    }

    pub fn complete_operation_full(&self, operation_id: &str, message: Option<&str>) -> bool {
        {
            let mut operations = self.inner.operations.lock().unwrap();
            let Some(op) = operations.get_mut(operation_id) else {
                return false;
            };
            op.status = OperationStatus::Completed;
            op.progress = 100.0;
            op.completed_at = Some(Instant::now());
        }
        self.emit(
            operation_id,
            ProgressEventKind::Completed,
            100.0,
            None,
            Some(message.map(str::to_string).unwrap_or_else(|| "Completed".to_string())),
            None,
            None,
        );
        true
    }

    pub fn fail_operation_full(&self, operation_id: &str, error: &str) -> bool {
        {
            let mut operations = self.inner.operations.lock().unwrap();
            let Some(op) = operations.get_mut(operation_id) else {
                return false;
            };
            op.status = OperationStatus::Failed;
            op.error = Some(error.to_string());
            op.completed_at = Some(Instant::now());
        }
        self.emit(
            operation_id,
            ProgressEventKind::Failed,
            0.0,
            None,
            Some(format!("Failed: {error}")),
            Some(error.to_string()),
            None,
        );
        true
    }

    /// Cancels an operation and recursively cancels its non-terminal
    /// children. Returns `false` if the operation is missing or not
    /// cancellable.
    pub fn cancel_operation(&self, operation_id: &str, message: Option<&str>) -> bool {
        let children = {
            let mut operations = self.inner.operations.lock().unwrap();
            let Some(op) = operations.get_mut(operation_id) else {
                return false;
            };
            if !op.cancellable || op.status.is_terminal() {
                return false;
            }
            op.status = OperationStatus::Cancelled;
            op.completed_at = Some(Instant::now());
            op.child_ids.clone()
        };

        for child_id in children {
            let is_active = self
                .inner
                .operations
                .lock()
                .unwrap()
                .get(&child_id)
                .map(|c| c.status.is_active())
                .unwrap_or(false);
            if is_active {
                self.cancel_operation(&child_id, Some("Parent operation cancelled"));
            }
        }

        self.emit(
            operation_id,
            ProgressEventKind::Cancelled,
            0.0,
            None,
            Some(message.map(str::to_string).unwrap_or_else(|| "Cancelled".to_string())),
            None,
            None,
        );
        true
    }

    pub fn warn_operation_full(&self, operation_id: &str, message: &str) -> bool {
        {
            let mut operations = self.inner.operations.lock().unwrap();
            let Some(op) = operations.get_mut(operation_id) else {
                return false;
            };
            op.warnings.push(message.to_string());
        }
        self.emit(
            operation_id,
            ProgressEventKind::Warning,
            0.0,
            None,
            Some(format!("Warning: {message}")),
            None,
            Some(message.to_string()),
        );
        true
    }

    pub fn start_bulk_operation(
        &self,
        op_type: &str,
        title: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
        total_items: u64,
    ) -> String {
        let id = self.start_operation_full(op_type, title, user_id, session_id, None, Some(total_items), true);
        if let Some(op) = self.inner.operations.lock().unwrap().get_mut(&id) {
            op.is_bulk_operation = true;
        }
        id
    }

    pub fn add_child_operation(&self, parent_id: &str, op_type: &str, title: &str) -> Option<String> {
        let (user_id, session_id) = {
            let operations = self.inner.operations.lock().unwrap();
            let parent = operations.get(parent_id)?;
            (parent.user_id.clone(), parent.session_id.clone())
        };
        Some(self.start_operation_full(
            op_type,
            title,
            user_id.as_deref(),
            session_id.as_deref(),
            Some(parent_id),
            None,
            true,
        ))
    }

    /// Recomputes a bulk operation's aggregate progress from its children,
    /// auto-completing (with or without warnings) or auto-failing once every
    /// child has reached a terminal state.
    pub fn update_bulk_progress(&self, bulk_operation_id: &str) -> bool {
        let child_ids = match self.get_operation(bulk_operation_id) {
            Some(op) => op.child_ids,
            None => return false,
        };
        if child_ids.is_empty() {
            return true;
        }

        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut total_progress = 0.0;
        for child_id in &child_ids {
            if let Some(child) = self.get_operation(child_id) {
                match child.status {
                    OperationStatus::Completed => {
                        completed += 1;
                        total_progress += 100.0;
                    }
                    OperationStatus::Failed => {
                        failed += 1;
                    }
                    _ => total_progress += child.progress,
                }
            }
        }

        let total_children = child_ids.len() as u64;
        let overall_progress = total_progress / total_children as f64;
        let processed = completed + failed;

        self.update_progress_full(
            bulk_operation_id,
            Some(overall_progress),
            Some(&format!("Processing {processed}/{total_children} items")),
            None,
            Some(processed),
            Some(completed),
            Some(failed),
        );

        if processed >= total_children {
            if failed == 0 {
                self.complete_operation_full(
                    bulk_operation_id,
                    Some(&format!("Bulk operation completed successfully: {completed}/{total_children} items")),
                );
            } else if completed == 0 {
                self.fail_operation_full(
                    bulk_operation_id,
                    &format!("Bulk operation failed: {failed}/{total_children} items failed"),
                );
            } else {
                self.complete_operation_full(
                    bulk_operation_id,
                    Some(&format!("Bulk operation completed with warnings: {completed} succeeded, {failed} failed")),
                );
            }
        }

        true
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        operation_id: &str,
        kind: ProgressEventKind,
        progress: f64,
        step: Option<String>,
        message: Option<String>,
        error: Option<String>,
        warning: Option<String>,
    ) {
        let (op_type, user_id, session_id, estimated_completion) = self
            .get_operation(operation_id)
            .map(|op| (op.op_type, op.user_id, op.session_id, op.estimated_completion))
            .unwrap_or_default();

        let event = ProgressEvent {
            id: manga_core::ids::new_id(),
            operation_id: operation_id.to_string(),
            operation_type: op_type,
            kind,
            progress,
            step,
            message,
            error,
            warning,
            timestamp: Instant::now(),
            estimated_completion,
            user_id,
            session_id,
        };

        self.inner.listeners.lock().unwrap().emit(&event);

        if self.inner.persistence.is_none() && self.inner.broadcaster.is_none() {
            return;
        }

        let persistence = self.inner.persistence.clone();
        let broadcaster = self.inner.broadcaster.clone();
        let operation_snapshot = self.get_operation(operation_id);
        tokio::spawn(async move {
            if let Some(sink) = &persistence {
                sink.save_event(&event).await;
                if let Some(op) = &operation_snapshot {
                    sink.save_operation(op).await;
                }
            }
            if let Some(broadcaster) = &broadcaster {
                broadcaster.broadcast_event(&event).await;
            }
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressTracker {
    fn start_operation(&self, op_type: &str, title: &str) -> String {
        self.start_operation_full(op_type, title, None, None, None, None, true)
    }

    fn update_progress(&self, op_id: &str, progress: Option<f64>, step: Option<&str>) {
        self.update_progress_full(op_id, progress, step, None, None, None, None);
    }

    fn complete_operation(&self, op_id: &str, message: Option<&str>) {
        self.complete_operation_full(op_id, message);
    }

    fn fail_operation(&self, op_id: &str, error: &str) {
        self.fail_operation_full(op_id, error);
    }

    fn warn_operation(&self, op_id: &str, message: &str) {
        self.warn_operation_full(op_id, message);
    }
}

/// Builds a [`ProgressTracker`] with optional persistence and broadcast
/// sinks wired in.
#[derive(Default)]
pub struct ProgressTrackerBuilder {
    persistence: Option<Arc<dyn PersistenceSink>>,
    broadcaster: Option<Arc<WebSocketBroadcaster>>,
    max_completed_operations: Option<usize>,
}

impl ProgressTrackerBuilder {
    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<WebSocketBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn max_completed_operations(mut self, n: usize) -> Self {
        self.max_completed_operations = Some(n);
        self
    }

    pub fn build(self) -> ProgressTracker {
        ProgressTracker {
            inner: Arc::new(Inner {
                operations: Mutex::new(HashMap::new()),
                listeners: Mutex::new(EventListeners::new()),
                persistence: self.persistence,
                broadcaster: self.broadcaster,
                max_completed_operations: self.max_completed_operations.unwrap_or(DEFAULT_MAX_COMPLETED_OPERATIONS),
                cleanup_task: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        events: AtomicUsize,
        operations: AtomicUsize,
    }

    #[async_trait]
    impl PersistenceSink for CountingSink {
        async fn save_operation(&self, _operation: &Operation) -> bool {
            self.operations.fetch_add(1, Ordering::SeqCst);
            true
        }
        async fn save_event(&self, _event: &ProgressEvent) -> bool {
            self.events.fetch_add(1, Ordering::SeqCst);
            true
        }
        async fn cleanup_old_data(&self) -> crate::persistence::CleanupStats {
            Default::default()
        }
    }

    #[tokio::test]
    async fn start_and_complete_updates_status() {
        let tracker = ProgressTracker::new();
        let id = tracker.start_operation("search", "Search one-piece");
        assert_eq!(tracker.get_operation(&id).unwrap().status, OperationStatus::Running);

        tracker.complete_operation(&id, Some("done"));
        let op = tracker.get_operation(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.progress, 100.0);
    }

    #[tokio::test]
    async fn cancelling_parent_cascades_to_active_children() {
        let tracker = ProgressTracker::new();
        let parent = tracker.start_bulk_operation("download", "Bulk download", None, None, 2);
        let child1 = tracker.add_child_operation(&parent, "download", "Chapter 1").unwrap();
        let child2 = tracker.add_child_operation(&parent, "download", "Chapter 2").unwrap();
        tracker.complete_operation_full(&child2, None);

        assert!(tracker.cancel_operation(&parent, None));

        assert_eq!(tracker.get_operation(&child1).unwrap().status, OperationStatus::Cancelled);
        assert_eq!(tracker.get_operation(&child2).unwrap().status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn bulk_progress_auto_completes_with_warnings_on_mixed_outcome() {
        let tracker = ProgressTracker::new();
        let bulk = tracker.start_bulk_operation("download", "Bulk", None, None, 2);
        let ok = tracker.add_child_operation(&bulk, "download", "ok").unwrap();
        let bad = tracker.add_child_operation(&bulk, "download", "bad").unwrap();

        tracker.complete_operation_full(&ok, None);
        tracker.update_bulk_progress(&bulk);
        tracker.fail_operation_full(&bad, "network error");
        tracker.update_bulk_progress(&bulk);

        let op = tracker.get_operation(&bulk).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.successful_items, 1);
        assert_eq!(op.failed_items, 1);
    }

    #[tokio::test]
    async fn emits_persist_events_and_operation_through_sink() {
        let sink = Arc::new(CountingSink {
            events: AtomicUsize::new(0),
            operations: AtomicUsize::new(0),
        });
        let tracker = ProgressTracker::builder().persistence(sink.clone()).build();

        let id = tracker.start_operation("search", "Search");
        tracker.update_progress(&id, Some(50.0), Some("halfway"));
        tracker.complete_operation(&id, None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.events.load(Ordering::SeqCst), 3);
        assert_eq!(sink.operations.load(Ordering::SeqCst), 3);
    }
}
