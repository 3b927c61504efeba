//! Typed execution logic dispatched per [`JobType`], grounded on
//! `jobs/workers.py`'s `DownloadWorker`/`HealthCheckWorker`/`OrganizationWorker`.
//!
//! Cancellation is deliberately NOT handled in here: `tokio::task::JoinHandle::abort`
//! gives a running task no chance to run further code, unlike the catchable
//! `asyncio.CancelledError` the original relies on. `JobQueue::pause_job`/`cancel_job`
//! update status and emit events directly, then abort the task; this module only
//! ever produces a success message or a `CoreError`.

use std::sync::Arc;
use std::time::Duration;

use manga_agent::AgentRegistry;
use manga_core::error::CoreError;
use manga_health::HealthMonitor;

use crate::job::{HealthCheckResults, Job, JobPayload, JobType};

/// Broad category a [`JobType`] executes under.
pub(crate) enum WorkerKind {
    Download,
    HealthCheck,
    Organization,
}

impl WorkerKind {
    pub(crate) fn for_job_type(t: JobType) -> Self {
        if t.is_download() {
            WorkerKind::Download
        } else if t.is_health() {
            WorkerKind::HealthCheck
        } else {
            WorkerKind::Organization
        }
    }
}

/// Callback used by executors to push progress milestones back onto the
/// job record without holding the queue's lock across an await point.
pub(crate) trait Reporter: Send + Sync {
    fn report(&self, progress: f64, step: &str, items_processed: Option<u64>);
}

pub(crate) async fn execute(
    kind: WorkerKind,
    job: &Job,
    registry: &Arc<AgentRegistry>,
    health_monitor: Option<&Arc<HealthMonitor>>,
    reporter: &dyn Reporter,
) -> Result<(String, JobPayload), CoreError> {
    match kind {
        WorkerKind::Download => run_download(job, registry, reporter).await,
        WorkerKind::HealthCheck => run_health_check(job, registry, health_monitor, reporter).await,
        WorkerKind::Organization => run_organization(job, reporter).await,
    }
}

async fn run_download(
    job: &Job,
    registry: &Arc<AgentRegistry>,
    reporter: &dyn Reporter,
) -> Result<(String, JobPayload), CoreError> {
    let JobPayload::Download { provider_name, manga_id, chapter_id, items, .. } = &job.payload else {
        return Err(CoreError::Invalid("download job without a download payload".into()));
    };
    let agent = registry
        .get(provider_name)
        .ok_or_else(|| CoreError::NotFound(format!("provider '{provider_name}' not registered")))?;

    match job.job_type {
        JobType::DownloadCover => {
            let manga_id = manga_id.as_deref().ok_or_else(|| CoreError::Invalid("missing manga_id".into()))?;
            reporter.report(10.0, "fetching cover", None);
            let bytes = agent.download_cover(manga_id).await?;
            reporter.report(100.0, "cover downloaded", Some(1));
            Ok((format!("downloaded cover ({} bytes)", bytes.len()), job.payload.clone()))
        }
        JobType::DownloadChapter | JobType::DownloadPage => {
            let manga_id = manga_id.as_deref().ok_or_else(|| CoreError::Invalid("missing manga_id".into()))?;
            let chapter_id = chapter_id.as_deref().ok_or_else(|| CoreError::Invalid("missing chapter_id".into()))?;
            let (total, _) = download_chapter(&agent, manga_id, chapter_id, reporter, 0.0, 100.0).await?;
            Ok((format!("downloaded {total} page(s)"), job.payload.clone()))
        }
        JobType::DownloadManga => {
            let manga_id = manga_id.as_deref().ok_or_else(|| CoreError::Invalid("missing manga_id".into()))?;
            reporter.report(2.0, "fetching manga details", None);
            agent.manga_details(manga_id).await?;
            reporter.report(5.0, "listing chapters", None);
            let chapters = agent.chapters(manga_id, 1, 500).await?;
            let n = chapters.items.len().max(1) as f64;
            let mut downloaded = 0u64;
            for (i, chapter) in chapters.items.iter().enumerate() {
                let lo = 5.0 + (i as f64 / n) * 90.0;
                let hi = 5.0 + ((i + 1) as f64 / n) * 90.0;
                let (pages, _) = download_chapter(&agent, manga_id, &chapter.id, reporter, lo, hi).await?;
                downloaded += pages as u64;
            }
            reporter.report(100.0, "manga download complete", Some(downloaded));
            Ok((format!("downloaded {} chapter(s), {downloaded} page(s)", chapters.items.len()), job.payload.clone()))
        }
        JobType::BulkDownload => {
            let n = items.len().max(1) as f64;
            let mut downloaded = 0u64;
            for (i, item) in items.iter().enumerate() {
                let lo = (i as f64 / n) * 100.0;
                let hi = ((i + 1) as f64 / n) * 100.0;
                reporter.report(lo, &format!("downloading {}", item.title), Some(i as u64));
                let (pages, _) = download_chapter(&agent, &item.manga_id, &item.chapter_id, reporter, lo, hi).await?;
                downloaded += pages as u64;
            }
            reporter.report(100.0, "bulk download complete", Some(items.len() as u64));
            Ok((format!("downloaded {} item(s), {downloaded} page(s)", items.len()), job.payload.clone()))
        }
        other => Err(CoreError::Invalid(format!("{other:?} is not a download job type"))),
    }
}

async fn download_chapter(
    agent: &manga_agent::Agent,
    manga_id: &str,
    chapter_id: &str,
    reporter: &dyn Reporter,
    progress_lo: f64,
    progress_hi: f64,
) -> Result<(usize, ()), CoreError> {
    let pages = agent.pages(manga_id, chapter_id).await?;
    let n = pages.len().max(1) as f64;
    for (i, url) in pages.iter().enumerate() {
        agent.download_page(url, None).await?;
        let frac = (i + 1) as f64 / n;
        reporter.report(progress_lo + frac * (progress_hi - progress_lo), "downloading pages", Some((i + 1) as u64));
    }
    Ok((pages.len(), ()))
}

async fn run_health_check(
    job: &Job,
    registry: &Arc<AgentRegistry>,
    health_monitor: Option<&Arc<HealthMonitor>>,
    reporter: &dyn Reporter,
) -> Result<(String, JobPayload), CoreError> {
    let JobPayload::HealthCheck { provider_name, test_search, test_metadata, test_download, performance_benchmark, .. } =
        &job.payload
    else {
        return Err(CoreError::Invalid("health check job without a health check payload".into()));
    };
    let agent = registry
        .get(provider_name)
        .ok_or_else(|| CoreError::NotFound(format!("provider '{provider_name}' not registered")))?;

    let mut results = HealthCheckResults::default();
    let mut step = 0.0f64;
    let active = [*test_search, *test_metadata, *test_download, *performance_benchmark]
        .iter()
        .filter(|b| **b)
        .count()
        .max(1) as f64;
    let mut advance = |label: &str| {
        step += 1.0;
        reporter.report((step / active) * 100.0, label, None);
    };

    if *test_search {
        advance("testing search");
        results.search_passed = Some(agent.search("test", 1, 1).await.is_ok());
    }
    if *test_metadata {
        advance("testing metadata");
        let probe = agent.search("test", 1, 1).await;
        results.metadata_passed = Some(match probe {
            Ok(p) => match p.items.first() {
                Some(hit) => agent.manga_details(&hit.id).await.is_ok(),
                None => true,
            },
            Err(_) => false,
        });
    }
    if *test_download {
        advance("testing download");
        results.download_passed = Some(agent.health_check(Duration::from_secs(10)).await.is_ok());
    }
    if *performance_benchmark {
        advance("benchmarking performance");
        let start = std::time::Instant::now();
        let ok = agent.health_check(Duration::from_secs(10)).await.is_ok();
        results.performance_passed = Some(ok && start.elapsed() < Duration::from_secs(5));
    }

    let failed = results.failed_count();
    let health_check_succeeded = results.search_passed.unwrap_or(true)
        && results.metadata_passed.unwrap_or(true)
        && results.download_passed.unwrap_or(true)
        && results.performance_passed.unwrap_or(true);

    if let Some(monitor) = health_monitor {
        monitor.record_external(provider_name, health_check_succeeded, Duration::from_millis(1), None);
    }

    let message = if failed == 0 {
        "passed all tests".to_string()
    } else {
        format!("completed with {failed} failed test(s)")
    };
    reporter.report(100.0, &message, None);

    let payload = JobPayload::HealthCheck {
        provider_name: provider_name.clone(),
        test_search: *test_search,
        test_metadata: *test_metadata,
        test_download: *test_download,
        performance_benchmark: *performance_benchmark,
        results: Some(results),
    };
    Ok((message, payload))
}

/// File mechanics (move/copy/scan) are out of scope (spec §6); this walks
/// the same milestone sequence as the original without touching a filesystem.
async fn run_organization(job: &Job, reporter: &dyn Reporter) -> Result<(String, JobPayload), CoreError> {
    let JobPayload::Organization { target_path, organization_type } = &job.payload else {
        return Err(CoreError::Invalid("organization job without an organization payload".into()));
    };

    const MILESTONES: &[(f64, &str)] = &[
        (15.0, "scanning files"),
        (35.0, "analyzing structure"),
        (55.0, "planning changes"),
        (75.0, "applying changes"),
        (90.0, "updating metadata"),
        (100.0, "cleaning up"),
    ];
    for (progress, step) in MILESTONES {
        reporter.report(*progress, step, None);
    }

    Ok((
        format!("organized '{target_path}' ({organization_type})"),
        job.payload.clone(),
    ))
}
