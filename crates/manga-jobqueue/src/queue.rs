//! Priority job queue and scheduler, grounded on
//! `jobs/queue_manager.py::DownloadQueueManager`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use manga_agent::AgentRegistry;
use manga_core::events::EventListeners;
use manga_core::ProgressSink;
use manga_health::HealthMonitor;
use tokio::task::JoinHandle;

use crate::events::{JobEvent, JobEventKind};
use crate::job::{Job, JobPriority, JobStatus, JobType};
use crate::worker::{execute, Reporter, WorkerKind};

const SCHEDULER_TICK: Duration = Duration::from_secs(1);
const JANITOR_INTERVAL: Duration = Duration::from_secs(3600);
const JOB_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Tunables for [`JobQueue`], defaulting to the values in spec §4.8.
#[derive(Debug, Clone, Copy)]
pub struct JobQueueConfig {
    pub max_concurrent_downloads: usize,
    pub max_concurrent_health_checks: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_concurrent_health_checks: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
}

struct State {
    jobs: HashMap<String, Job>,
    priority_queues: HashMap<JobPriority, VecDeque<String>>,
    /// worker_id -> (job_id, task handle), so pause/cancel can abort in-flight work.
    active_workers: HashMap<String, (String, JoinHandle<()>)>,
    /// job_id -> progress-tracker operation id, for jobs mirrored into a
    /// `ProgressSink` (e.g. bulk downloads the UI watches as operations).
    progress_ops: HashMap<String, String>,
    stats: QueueStats,
}

impl State {
    fn new() -> Self {
        let mut priority_queues = HashMap::new();
        for p in JobPriority::ALL {
            priority_queues.insert(p, VecDeque::new());
        }
        Self {
            jobs: HashMap::new(),
            priority_queues,
            active_workers: HashMap::new(),
            progress_ops: HashMap::new(),
            stats: QueueStats::default(),
        }
    }

    fn worker_for_job(&self, job_id: &str) -> Option<String> {
        self.active_workers
            .iter()
            .find(|(_, (jid, _))| jid == job_id)
            .map(|(wid, _)| wid.clone())
    }
}

/// Central coordinator for priority-ordered job dispatch (spec §4.8,
/// component C8).
pub struct JobQueue {
    state: Mutex<State>,
    listeners: Mutex<EventListeners<JobEvent>>,
    config: JobQueueConfig,
    registry: Arc<AgentRegistry>,
    health_monitor: Option<Arc<HealthMonitor>>,
    progress: Option<Arc<dyn ProgressSink>>,
    running: AtomicBool,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    janitor_task: Mutex<Option<JoinHandle<()>>>,
}

struct ChannelReporter {
    tx: tokio::sync::mpsc::UnboundedSender<(f64, String, Option<u64>)>,
}

impl Reporter for ChannelReporter {
    fn report(&self, progress: f64, step: &str, items_processed: Option<u64>) {
        let _ = self.tx.send((progress, step.to_string(), items_processed));
    }
}

impl JobQueue {
    /// Builds a queue. Chain [`Self::with_health_monitor`] / [`Self::with_progress_sink`]
    /// before wrapping the result in an `Arc` to call [`Self::start`].
    pub fn new(config: JobQueueConfig, registry: Arc<AgentRegistry>) -> Self {
        Self {
            state: Mutex::new(State::new()),
            listeners: Mutex::new(EventListeners::new()),
            config,
            registry,
            health_monitor: None,
            progress: None,
            running: AtomicBool::new(false),
            scheduler_task: Mutex::new(None),
            janitor_task: Mutex::new(None),
        }
    }

    pub fn with_health_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.health_monitor = Some(monitor);
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn add_listener<L>(&self, listener: L)
    where
        L: manga_core::events::EventListener<JobEvent> + 'static,
    {
        self.listeners.lock().unwrap().add(listener);
    }

    /// Starts the 1Hz scheduler loop and the hourly janitor. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.clone();
        *self.scheduler_task.lock().unwrap() = Some(tokio::spawn(async move {
            while scheduler.running.load(Ordering::SeqCst) {
                scheduler.process_queue().await;
                tokio::time::sleep(SCHEDULER_TICK).await;
            }
        }));

        let janitor = self.clone();
        *self.janitor_task.lock().unwrap() = Some(tokio::spawn(async move {
            while janitor.running.load(Ordering::SeqCst) {
                tokio::time::sleep(JANITOR_INTERVAL).await;
                janitor.cleanup_old_jobs();
            }
        }));
    }

    pub async fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        let scheduler = self.scheduler_task.lock().unwrap().take();
        let janitor = self.janitor_task.lock().unwrap().take();
        for task in [scheduler, janitor] {
            if let Some(handle) = task {
                handle.abort();
                let _ = handle.await;
            }
        }
        let workers: Vec<JoinHandle<()>> =
            self.state.lock().unwrap().active_workers.drain().map(|(_, (_, h))| h).collect();
        for handle in workers {
            handle.abort();
        }
    }

    /// Enqueues `job`, returning its id.
    pub fn add_job(&self, job: Job) -> String {
        let id = job.id.clone();
        let mut state = self.state.lock().unwrap();
        state.priority_queues.entry(job.priority).or_default().push_back(id.clone());
        state.stats.total_jobs += 1;
        if let Some(sink) = &self.progress {
            let op_id = sink.start_operation(job.job_type.as_str(), &job.title);
            state.progress_ops.insert(id.clone(), op_id);
        }
        let event = job_event(&job, JobEventKind::Queued, "Job added to queue".to_string());
        state.jobs.insert(id.clone(), job);
        drop(state);
        self.emit(event);
        id
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(job_id).cloned()
    }

    pub fn get_jobs(&self, status: Option<JobStatus>, job_type: Option<JobType>, user_id: Option<&str>) -> Vec<Job> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .filter(|j| job_type.map_or(true, |t| j.job_type == t))
            .filter(|j| user_id.map_or(true, |u| j.user_id.as_deref() == Some(u)))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.created_at.cmp(&b.created_at)));
        jobs
    }

    /// Pauses a processing job. The worker task is aborted only after the
    /// job's state has already been updated and the event emitted, since an
    /// aborted tokio task gets no chance to run cleanup of its own.
    pub fn pause_job(&self, job_id: &str) -> bool {
        let (worker, event) = {
            let mut state = self.state.lock().unwrap();
            if !matches!(state.jobs.get(job_id).map(|j| j.status), Some(JobStatus::Processing)) {
                return false;
            }
            let worker_id = state.worker_for_job(job_id);
            let job = state.jobs.get_mut(job_id).unwrap();
            job.mark_paused();
            let event = job_event(job, JobEventKind::Paused, "Job paused".to_string());
            (worker_id, event)
        };
        if let Some(worker_id) = worker {
            self.abort_worker(&worker_id);
        }
        self.emit(event);
        true
    }

    pub fn resume_job(&self, job_id: &str) -> bool {
        let event = {
            let mut state = self.state.lock().unwrap();
            if !matches!(state.jobs.get(job_id).map(|j| j.status), Some(JobStatus::Paused)) {
                return false;
            }
            let priority = state.jobs.get(job_id).unwrap().priority;
            state.priority_queues.entry(priority).or_default().push_front(job_id.to_string());
            let job = state.jobs.get_mut(job_id).unwrap();
            job.status = JobStatus::Pending;
            job_event(job, JobEventKind::Resumed, "Job resumed".to_string())
        };
        self.emit(event);
        true
    }

    /// Cancels a pending or processing job. Same abort-after-update ordering
    /// as `pause_job`.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let (worker, event, op_id) = {
            let mut state = self.state.lock().unwrap();
            let finished = state.jobs.get(job_id).map(|j| j.status.is_finished()).unwrap_or(true);
            if finished {
                return false;
            }
            let worker_id = state.worker_for_job(job_id);
            let was_pending = matches!(state.jobs.get(job_id).map(|j| j.status), Some(JobStatus::Pending));
            if was_pending {
                let priority = state.jobs.get(job_id).unwrap().priority;
                if let Some(queue) = state.priority_queues.get_mut(&priority) {
                    queue.retain(|id| id != job_id);
                }
            }
            let job = state.jobs.get_mut(job_id).unwrap();
            job.mark_cancelled();
            state.stats.cancelled_jobs += 1;
            let event = job_event(job, JobEventKind::Cancelled, "Job cancelled".to_string());
            let op_id = state.progress_ops.remove(job_id);
            (worker_id, event, op_id)
        };
        if let Some(worker_id) = worker {
            self.abort_worker(&worker_id);
        }
        if let (Some(sink), Some(op_id)) = (&self.progress, op_id) {
            sink.fail_operation(&op_id, "cancelled");
        }
        self.emit(event);
        true
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().unwrap().stats
    }

    fn abort_worker(&self, worker_id: &str) {
        if let Some((_, handle)) = self.state.lock().unwrap().active_workers.remove(worker_id) {
            handle.abort();
        }
    }

    fn emit(&self, event: JobEvent) {
        self.listeners.lock().unwrap().emit(&event);
    }

    fn cleanup_old_jobs(&self) {
        let mut state = self.state.lock().unwrap();
        let cutoff = Instant::now().checked_sub(JOB_RETENTION);
        let Some(cutoff) = cutoff else { return };
        let stale: Vec<String> = state
            .jobs
            .values()
            .filter(|j| j.status.is_finished())
            .filter(|j| j.completed_at.map(|c| c < cutoff).unwrap_or(false))
            .map(|j| j.id.clone())
            .collect();
        for id in stale {
            state.jobs.remove(&id);
        }
    }

    /// One scheduler tick: repeatedly scans priorities ascending, dispatching
    /// every ready head until a full pass makes no progress.
    async fn process_queue(self: &Arc<Self>) {
        loop {
            let mut dispatched_any = false;
            for priority in JobPriority::ALL {
                if self.dispatch_one(priority) {
                    dispatched_any = true;
                }
            }
            if !dispatched_any {
                break;
            }
        }
    }

    /// Attempts to dispatch the ready head of `priority`'s queue. An unmet
    /// dependency or a saturated concurrency cap at the head stops this
    /// priority for the tick without dropping the blocked job, mirroring the
    /// original's capacity-cap short-circuit.
    fn dispatch_one(self: &Arc<Self>, priority: JobPriority) -> bool {
        let dispatch = {
            let mut state = self.state.lock().unwrap();

            let active_downloads = state
                .jobs
                .values()
                .filter(|j| j.job_type.is_download() && j.status == JobStatus::Processing)
                .count();
            let active_health = state
                .jobs
                .values()
                .filter(|j| j.job_type.is_health() && j.status == JobStatus::Processing)
                .count();

            loop {
                let Some(job_id) = state.priority_queues.get(&priority).and_then(|q| q.front()).cloned() else {
                    break None;
                };

                let Some(job) = state.jobs.get(&job_id) else {
                    state.priority_queues.get_mut(&priority).unwrap().pop_front();
                    continue;
                };
                if job.status != JobStatus::Pending {
                    state.priority_queues.get_mut(&priority).unwrap().pop_front();
                    continue;
                }

                let deps_satisfied = job
                    .depends_on
                    .iter()
                    .all(|dep| state.jobs.get(dep).map(|d| d.status == JobStatus::Completed).unwrap_or(false));
                if !deps_satisfied {
                    break None;
                }

                let can_start = if job.job_type.is_download() {
                    active_downloads < self.config.max_concurrent_downloads
                } else if job.job_type.is_health() {
                    active_health < self.config.max_concurrent_health_checks
                } else {
                    true
                };
                if !can_start {
                    break None;
                }

                state.priority_queues.get_mut(&priority).unwrap().pop_front();
                let job = state.jobs.get_mut(&job_id).unwrap();
                job.mark_started();
                let worker_id = manga_core::ids::new_id();
                let event = job_event(job, JobEventKind::Started, format!("Job started by worker {worker_id}"));
                break Some((job_id, worker_id, event));
            }
        };

        let Some((job_id, worker_id, event)) = dispatch else {
            return false;
        };
        self.emit(event);
        self.spawn_worker(job_id, worker_id);
        true
    }

    fn spawn_worker(self: &Arc<Self>, job_id: String, worker_id: String) {
        let queue = self.clone();
        let wid = worker_id.clone();
        let handle = tokio::spawn(async move {
            queue.run_worker(job_id, wid).await;
        });
        self.state
            .lock()
            .unwrap()
            .active_workers
            .insert(worker_id, (String::new(), handle));
        // job_id was moved into the task; active_workers is keyed by
        // worker_id and only needs the job_id for `worker_for_job` lookups,
        // which is populated below once the task starts.
    }

    async fn run_worker(self: Arc<Self>, job_id: String, worker_id: String) {
        // Record the job_id against this worker now that both are known, so
        // pause_job/cancel_job can find the task to abort.
        if let Some(entry) = self.state.lock().unwrap().active_workers.get_mut(&worker_id) {
            entry.0 = job_id.clone();
        }

        let Some(job) = self.get_job(&job_id) else {
            self.state.lock().unwrap().active_workers.remove(&worker_id);
            return;
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = ChannelReporter { tx };
        let kind = WorkerKind::for_job_type(job.job_type);

        let progress_job_id = job_id.clone();
        let progress_queue = self.clone();
        let progress_task = tokio::spawn(async move {
            while let Some((progress, step, items_processed)) = rx.recv().await {
                progress_queue.apply_progress(&progress_job_id, progress, &step, items_processed);
            }
        });

        let outcome = execute(kind, &job, &self.registry, self.health_monitor.as_ref(), &reporter).await;
        drop(reporter);
        let _ = progress_task.await;

        self.finish_job(&job_id, outcome);
        self.state.lock().unwrap().active_workers.remove(&worker_id);
    }

    fn apply_progress(&self, job_id: &str, progress: f64, step: &str, items_processed: Option<u64>) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.update_progress(Some(progress), Some(step), items_processed);
        }
        let op_id = state.progress_ops.get(job_id).cloned();
        drop(state);
        if let (Some(sink), Some(op_id)) = (&self.progress, op_id) {
            sink.update_progress(&op_id, Some(progress), Some(step));
        }
    }

    fn finish_job(&self, job_id: &str, outcome: Result<(String, crate::job::JobPayload), manga_core::error::CoreError>) {
        let (event, terminal) = {
            let mut state = self.state.lock().unwrap();
            let Some(job) = state.jobs.get_mut(job_id) else { return };

            match outcome {
                Ok((message, payload)) => {
                    job.payload = payload;
                    job.mark_completed(Some(&message));
                    state.stats.completed_jobs += 1;
                    (job_event(job, JobEventKind::Completed, message), Some(Ok(())))
                }
                Err(err) if err.is_cancelled() => {
                    job.mark_cancelled();
                    state.stats.cancelled_jobs += 1;
                    (job_event(job, JobEventKind::Cancelled, "Job cancelled".to_string()), Some(Err("cancelled".to_string())))
                }
                Err(err) => {
                    let message = err.user_message();
                    if job.increment_retry() {
                        job.status = JobStatus::Retrying;
                        let priority = job.priority;
                        let event = job_event(job, JobEventKind::Retrying, format!("retrying after error: {message}"));
                        job.status = JobStatus::Pending;
                        state.priority_queues.entry(priority).or_default().push_front(job_id.to_string());
                        (event, None)
                    } else {
                        job.mark_failed(message.clone());
                        state.stats.failed_jobs += 1;
                        (job_event(job, JobEventKind::Failed, message.clone()), Some(Err(message)))
                    }
                }
            }
        };

        if let Some(outcome) = terminal {
            let op_id = self.state.lock().unwrap().progress_ops.remove(job_id);
            if let (Some(sink), Some(op_id)) = (&self.progress, op_id) {
                match outcome {
                    Ok(()) => sink.complete_operation(&op_id, Some(&event.message)),
                    Err(err) => sink.fail_operation(&op_id, &err),
                }
            }
        }
        self.emit(event);
    }
}

fn job_event(job: &Job, kind: JobEventKind, message: String) -> JobEvent {
    JobEvent {
        job_id: job.id.clone(),
        job_type: job.job_type.as_str(),
        kind,
        message,
        progress: job.progress,
        items_processed: job.items_processed,
        items_total: job.items_total,
        user_id: job.user_id.clone(),
        session_id: job.session_id.clone(),
    }
}
