//! Job types and the [`Job`] record, grounded on `jobs/models.py`.

use std::time::{Duration, Instant};

/// Priority levels for jobs, ordered ascending (lower value dispatches
/// first). Derived `Ord` matches the declaration order below, which in
/// turn matches the original numeric mapping (`CRITICAL=1` .. `BULK=5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
    Bulk,
}

impl JobPriority {
    /// All priorities, in ascending dispatch order.
    pub const ALL: [JobPriority; 5] = [
        JobPriority::Critical,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
        JobPriority::Bulk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Critical => "critical",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
            JobPriority::Bulk => "bulk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Paused,
    Cancelled,
    Retrying,
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing | JobStatus::Retrying)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    DownloadChapter,
    DownloadManga,
    DownloadCover,
    DownloadPage,
    BulkDownload,
    HealthCheck,
    ProviderTest,
    PerformanceBenchmark,
    OrganizeLibrary,
    OrganizeManga,
    ConvertFormat,
    CleanupFiles,
    BackupDatabase,
    MigrateData,
    UpdateMetadata,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DownloadChapter => "download_chapter",
            JobType::DownloadManga => "download_manga",
            JobType::DownloadCover => "download_cover",
            JobType::DownloadPage => "download_page",
            JobType::BulkDownload => "bulk_download",
            JobType::HealthCheck => "health_check",
            JobType::ProviderTest => "provider_test",
            JobType::PerformanceBenchmark => "performance_benchmark",
            JobType::OrganizeLibrary => "organize_library",
            JobType::OrganizeManga => "organize_manga",
            JobType::ConvertFormat => "convert_format",
            JobType::CleanupFiles => "cleanup_files",
            JobType::BackupDatabase => "backup_database",
            JobType::MigrateData => "migrate_data",
            JobType::UpdateMetadata => "update_metadata",
        }
    }

    pub fn is_download(&self) -> bool {
        matches!(
            self,
            JobType::DownloadChapter
                | JobType::DownloadManga
                | JobType::DownloadCover
                | JobType::DownloadPage
                | JobType::BulkDownload
        )
    }

    pub fn is_health(&self) -> bool {
        matches!(self, JobType::HealthCheck | JobType::ProviderTest | JobType::PerformanceBenchmark)
    }

    pub fn is_organization(&self) -> bool {
        matches!(
            self,
            JobType::OrganizeLibrary | JobType::OrganizeManga | JobType::ConvertFormat | JobType::CleanupFiles
        )
    }

    /// Default per-type timeout (spec §4.8, ported from `get_job_timeout`).
    pub fn default_timeout(&self) -> Duration {
        let secs = match self {
            JobType::DownloadChapter => 1800,
            JobType::DownloadManga => 7200,
            JobType::DownloadCover => 300,
            JobType::DownloadPage => 120,
            JobType::BulkDownload => 14400,
            JobType::HealthCheck => 60,
            JobType::ProviderTest => 300,
            JobType::PerformanceBenchmark => 600,
            JobType::OrganizeLibrary => 3600,
            JobType::OrganizeManga => 1800,
            JobType::ConvertFormat => 3600,
            JobType::CleanupFiles => 1800,
            JobType::BackupDatabase => 7200,
            JobType::MigrateData => 14400,
            JobType::UpdateMetadata => 3600,
        };
        Duration::from_secs(secs)
    }

    /// Default priority for a job type absent a context override (spec
    /// `get_job_priority`'s type-based fallback branch).
    pub fn default_priority(&self) -> JobPriority {
        match self {
            JobType::HealthCheck | JobType::BackupDatabase => JobPriority::Critical,
            JobType::DownloadChapter | JobType::DownloadCover => JobPriority::High,
            JobType::DownloadManga | JobType::BulkDownload => JobPriority::Normal,
            JobType::OrganizeLibrary | JobType::CleanupFiles => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }
}

/// A bulk-download item: one chapter to fetch within a `BulkDownload` job.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub manga_id: String,
    pub chapter_id: String,
    pub title: String,
}

/// Type-specific payload carried by a [`Job`].
#[derive(Debug, Clone)]
pub enum JobPayload {
    Download {
        provider_name: String,
        manga_id: Option<String>,
        chapter_id: Option<String>,
        quality: String,
        format: String,
        items: Vec<BulkItem>,
    },
    HealthCheck {
        provider_name: String,
        test_search: bool,
        test_metadata: bool,
        test_download: bool,
        performance_benchmark: bool,
        results: Option<HealthCheckResults>,
    },
    Organization {
        target_path: String,
        organization_type: String,
    },
    None,
}

/// Structured results stored on a completed health-check job, matching
/// `job.metadata["health_results"]` in `workers.py`.
#[derive(Debug, Clone, Default)]
pub struct HealthCheckResults {
    pub search_passed: Option<bool>,
    pub metadata_passed: Option<bool>,
    pub download_passed: Option<bool>,
    pub performance_passed: Option<bool>,
}

impl HealthCheckResults {
    pub fn failed_count(&self) -> usize {
        [self.search_passed, self.metadata_passed, self.download_passed, self.performance_passed]
            .into_iter()
            .filter(|r| *r == Some(false))
            .count()
    }
}

/// A queued unit of work (spec §3 Job, §4.8).
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub title: String,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub progress: f64,
    pub current_step: String,
    pub items_processed: u64,
    pub items_total: Option<u64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub timeout: Duration,
    pub parent_job_id: Option<String>,
    pub child_job_ids: Vec<String>,
    pub depends_on: Vec<String>,
    pub payload: JobPayload,
}

impl Job {
    pub fn new(id: impl Into<String>, job_type: JobType, title: impl Into<String>, payload: JobPayload) -> Self {
        let priority = job_type.default_priority();
        let timeout = job_type.default_timeout();
        Self {
            id: id.into(),
            job_type,
            status: JobStatus::Pending,
            priority,
            title: title.into(),
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            current_step: String::new(),
            items_processed: 0,
            items_total: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            user_id: None,
            session_id: None,
            timeout,
            parent_job_id: None,
            child_job_ids: Vec::new(),
            depends_on: Vec::new(),
            payload,
        }
    }

    pub fn update_progress(&mut self, progress: Option<f64>, current_step: Option<&str>, items_processed: Option<u64>) {
        if let Some(p) = progress {
            self.progress = p.clamp(0.0, 100.0);
        }
        if let Some(step) = current_step {
            self.current_step = step.to_string();
        }
        if let Some(n) = items_processed {
            self.items_processed = n;
        }
        if let Some(total) = self.items_total {
            if total > 0 {
                self.progress = (self.items_processed as f64 / total as f64 * 100.0).min(100.0);
            }
        }
    }

    pub fn mark_started(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at = Some(Instant::now());
    }

    pub fn mark_completed(&mut self, message: Option<&str>) {
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.completed_at = Some(Instant::now());
        if let Some(m) = message {
            self.current_step = m.to_string();
        }
    }

    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Instant::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Instant::now());
    }

    pub fn mark_paused(&mut self) {
        self.status = JobStatus::Paused;
    }

    /// Increments the retry count; returns `true` if another attempt is
    /// still permitted (caller transitions to `Retrying`), `false` once
    /// retries are exhausted (caller marks `Failed`).
    pub fn increment_retry(&mut self) -> bool {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            true
        } else {
            false
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.started_at.is_some_and(|t| t.elapsed() > self.timeout)
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            (Some(start), None) if self.status == JobStatus::Processing => Some(start.elapsed()),
            _ => None,
        }
    }
}
