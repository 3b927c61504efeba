//! JSON wire shape for [`Job`] (spec §8 invariant 11), kept separate from
//! the internal type the same way `manga_progress::wire` keeps
//! `ProgressEventPayload` separate from `ProgressEvent`: `Job` carries
//! monotonic `Instant` timestamps that have no meaning off-process, so this
//! module re-expresses `created_at`/`started_at`/`completed_at` as RFC3339
//! strings (stamped at conversion time) rather than deriving `Serialize`
//! directly on `Job`.

use serde::{Deserialize, Serialize};

use crate::job::{BulkItem, HealthCheckResults, Job, JobPayload};
use manga_core::ids::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemPayload {
    pub manga_id: String,
    pub chapter_id: String,
    pub title: String,
}

impl From<&BulkItem> for BulkItemPayload {
    fn from(item: &BulkItem) -> Self {
        Self { manga_id: item.manga_id.clone(), chapter_id: item.chapter_id.clone(), title: item.title.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthCheckResultsPayload {
    pub search_passed: Option<bool>,
    pub metadata_passed: Option<bool>,
    pub download_passed: Option<bool>,
    pub performance_passed: Option<bool>,
}

impl From<&HealthCheckResults> for HealthCheckResultsPayload {
    fn from(results: &HealthCheckResults) -> Self {
        Self {
            search_passed: results.search_passed,
            metadata_passed: results.metadata_passed,
            download_passed: results.download_passed,
            performance_passed: results.performance_passed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobPayloadWire {
    Download {
        provider_name: String,
        manga_id: Option<String>,
        chapter_id: Option<String>,
        quality: String,
        format: String,
        items: Vec<BulkItemPayload>,
    },
    HealthCheck {
        provider_name: String,
        test_search: bool,
        test_metadata: bool,
        test_download: bool,
        performance_benchmark: bool,
        results: Option<HealthCheckResultsPayload>,
    },
    Organization {
        target_path: String,
        organization_type: String,
    },
    None,
}

impl From<&JobPayload> for JobPayloadWire {
    fn from(payload: &JobPayload) -> Self {
        match payload {
            JobPayload::Download { provider_name, manga_id, chapter_id, quality, format, items } => {
                JobPayloadWire::Download {
                    provider_name: provider_name.clone(),
                    manga_id: manga_id.clone(),
                    chapter_id: chapter_id.clone(),
                    quality: quality.clone(),
                    format: format.clone(),
                    items: items.iter().map(BulkItemPayload::from).collect(),
                }
            }
            JobPayload::HealthCheck {
                provider_name,
                test_search,
                test_metadata,
                test_download,
                performance_benchmark,
                results,
            } => JobPayloadWire::HealthCheck {
                provider_name: provider_name.clone(),
                test_search: *test_search,
                test_metadata: *test_metadata,
                test_download: *test_download,
                performance_benchmark: *performance_benchmark,
                results: results.as_ref().map(HealthCheckResultsPayload::from),
            },
            JobPayload::Organization { target_path, organization_type } => JobPayloadWire::Organization {
                target_path: target_path.clone(),
                organization_type: organization_type.clone(),
            },
            JobPayload::None => JobPayloadWire::None,
        }
    }
}

/// A `Job` snapshot, serializable and round-trippable (spec §8 invariant
/// 11). `created_at`/`started_at`/`completed_at` carry an RFC3339 stamp of
/// the moment this payload was built rather than the source `Instant`
/// (which cannot cross a process boundary); only the `Option`'s
/// presence/absence is preserved, not wall-clock equality with the
/// originating `Job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayloadSnapshot {
    pub id: String,
    pub job_type: String,
    pub status: String,
    pub priority: String,
    pub title: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub progress: f64,
    pub current_step: String,
    pub items_processed: u64,
    pub items_total: Option<u64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub timeout_secs: u64,
    pub parent_job_id: Option<String>,
    pub child_job_ids: Vec<String>,
    pub depends_on: Vec<String>,
    pub payload: JobPayloadWire,
}

impl From<&Job> for JobPayloadSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.as_str().to_string(),
            status: job.status.as_str().to_string(),
            priority: job.priority.as_str().to_string(),
            title: job.title.clone(),
            created_at: now_rfc3339(),
            started_at: job.started_at.map(|_| now_rfc3339()),
            completed_at: job.completed_at.map(|_| now_rfc3339()),
            progress: job.progress,
            current_step: job.current_step.clone(),
            items_processed: job.items_processed,
            items_total: job.items_total,
            error_message: job.error_message.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            user_id: job.user_id.clone(),
            session_id: job.session_id.clone(),
            timeout_secs: job.timeout.as_secs(),
            parent_job_id: job.parent_job_id.clone(),
            child_job_ids: job.child_job_ids.clone(),
            depends_on: job.depends_on.clone(),
            payload: JobPayloadWire::from(&job.payload),
        }
    }
}

// Parsing the enum strings back into `JobType`/`JobStatus`/`JobPriority` is
// deliberately not provided: nothing in this workspace reconstructs a
// `Job` from a wire snapshot (jobs are requeued from the in-memory queue,
// not rehydrated from JSON), so `JobPayloadSnapshot` only needs to produce
// a faithful, round-trippable JSON shape, not a full `TryFrom<&Job>`
// inverse.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPriority, JobStatus, JobType};
    use std::time::Duration;

    #[test]
    fn job_snapshot_round_trips_through_json() {
        let mut job = Job::new(
            "job-1",
            JobType::DownloadChapter,
            "Download chapter 1",
            JobPayload::Download {
                provider_name: "mangadex".into(),
                manga_id: Some("m1".into()),
                chapter_id: Some("c1".into()),
                quality: "high".into(),
                format: "cbz".into(),
                items: vec![BulkItem { manga_id: "m1".into(), chapter_id: "c1".into(), title: "Ch 1".into() }],
            },
        );
        job.mark_started();
        job.update_progress(Some(40.0), Some("downloading"), Some(4));
        job.max_retries = 2;
        job.retry_count = 1;

        let snapshot = JobPayloadSnapshot::from(&job);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: JobPayloadSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, "job-1");
        assert_eq!(back.job_type, "download_chapter");
        assert_eq!(back.status, "processing");
        assert_eq!(back.priority, JobPriority::High.as_str());
        assert_eq!(back.progress, 40.0);
        assert_eq!(back.items_processed, 4);
        assert_eq!(back.retry_count, 1);
        assert_eq!(back.max_retries, 2);
        assert!(back.started_at.is_some());
        assert!(back.completed_at.is_none());
        match back.payload {
            JobPayloadWire::Download { provider_name, items, .. } => {
                assert_eq!(provider_name, "mangadex");
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].chapter_id, "c1");
            }
            other => panic!("wrong payload variant: {other:?}"),
        }
    }

    #[test]
    fn health_check_payload_round_trips_with_results() {
        let mut job = Job::new(
            "job-2",
            JobType::HealthCheck,
            "Health check",
            JobPayload::HealthCheck {
                provider_name: "mangadex".into(),
                test_search: true,
                test_metadata: true,
                test_download: false,
                performance_benchmark: false,
                results: None,
            },
        );
        job.mark_completed(Some("done"));
        if let JobPayload::HealthCheck { results, .. } = &mut job.payload {
            *results = Some(HealthCheckResults {
                search_passed: Some(true),
                metadata_passed: Some(false),
                download_passed: None,
                performance_passed: None,
            });
        }

        let snapshot = JobPayloadSnapshot::from(&job);
        assert_eq!(snapshot.status, JobStatus::Completed.as_str());
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: JobPayloadSnapshot = serde_json::from_str(&json).unwrap();
        assert!(back.completed_at.is_some());
        match back.payload {
            JobPayloadWire::HealthCheck { results: Some(results), .. } => {
                assert_eq!(results.search_passed, Some(true));
                assert_eq!(results.metadata_passed, Some(false));
            }
            other => panic!("wrong payload variant: {other:?}"),
        }
    }
}
