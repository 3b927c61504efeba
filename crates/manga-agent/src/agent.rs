//! The uniform agent façade: every call path is
//! `RateLimiter.acquire → IsolationManager.execute → provider.invoke →
//! metrics.record → RateLimiter.release` (spec §4.3, component C3).

use crate::provider::{Provider, ProviderError};
use crate::types::{
    AgentCapability, AgentDescriptor, AgentMetrics, AgentStatus, Chapter, HealthCheckResult,
    MangaDetails, PagedResult, SearchResult,
};
use manga_core::{CoreError, ProgressSink};
use manga_isolation::{IsolationError, IsolationManager};
use manga_ratelimiter::{RateLimiter, RateLimiterError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

fn status_to_u8(s: AgentStatus) -> u8 {
    match s {
        AgentStatus::Active => 0,
        AgentStatus::Inactive => 1,
        AgentStatus::Error => 2,
        AgentStatus::CircuitOpen => 3,
    }
}

fn status_from_u8(v: u8) -> AgentStatus {
    match v {
        0 => AgentStatus::Active,
        1 => AgentStatus::Inactive,
        2 => AgentStatus::Error,
        _ => AgentStatus::CircuitOpen,
    }
}

/// A uniform wrapper over a single upstream [`Provider`], enforcing
/// concurrency, rate limiting, isolation, and metrics.
pub struct Agent {
    descriptor: AgentDescriptor,
    provider: Arc<dyn Provider>,
    rate_limiter: RateLimiter,
    isolation: IsolationManager,
    status: AtomicU8,
    metrics: Mutex<AgentMetrics>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl Agent {
    /// Builds an agent from its descriptor, provider implementation, and
    /// the rate limiter / isolation manager configured for it.
    pub fn new(
        descriptor: AgentDescriptor,
        provider: Arc<dyn Provider>,
        rate_limiter: RateLimiter,
        isolation: IsolationManager,
    ) -> Self {
        Self {
            descriptor,
            provider,
            rate_limiter,
            isolation,
            status: AtomicU8::new(status_to_u8(AgentStatus::Active)),
            metrics: Mutex::new(AgentMetrics::default()),
            progress: None,
        }
    }

    /// Attaches a progress sink used by `start_op`/`update_progress`/etc.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn has_capability(&self, cap: AgentCapability) -> bool {
        self.descriptor.has_capability(cap)
    }

    pub fn status(&self) -> AgentStatus {
        status_from_u8(self.status.load(Ordering::Acquire))
    }

    /// Active and Inactive both count as healthy: "not currently serving"
    /// is not the same as "failed" (spec §4.3).
    pub fn is_healthy(&self) -> bool {
        self.status().is_healthy()
    }

    /// Administrative enable; does not touch metrics.
    pub fn set_active(&self) {
        self.status.store(status_to_u8(AgentStatus::Active), Ordering::Release);
    }

    /// Administrative disable; does not touch metrics.
    pub fn set_inactive(&self) {
        self.status.store(status_to_u8(AgentStatus::Inactive), Ordering::Release);
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.metrics.lock().unwrap().clone()
    }

    // -- progress helpers (spec §4.3) ---------------------------------

    pub fn start_op(&self, op_type: &str, title: &str) -> Option<String> {
        self.progress.as_ref().map(|p| {
            p.start_operation(op_type, &format!("[{}] {title}", self.name()))
        })
    }

    pub fn update_progress(&self, op_id: &str, progress: Option<f64>, step: Option<&str>) {
        if let Some(p) = &self.progress {
            p.update_progress(op_id, progress, step);
        }
    }

    pub fn complete(&self, op_id: &str, msg: Option<&str>) {
        if let Some(p) = &self.progress {
            p.complete_operation(op_id, msg);
        }
    }

    pub fn fail(&self, op_id: &str, err: &str) {
        if let Some(p) = &self.progress {
            p.fail_operation(op_id, err);
        }
    }

    pub fn warn(&self, op_id: &str, msg: &str) {
        if let Some(p) = &self.progress {
            p.warn_operation(op_id, msg);
        }
    }

    // -- gated provider calls -------------------------------------------

    pub async fn search(
        &self,
        query: &str,
        page: u32,
        limit: u32,
    ) -> Result<PagedResult<SearchResult>, CoreError> {
        self.call("search", || self.provider.search(query, page, limit))
            .await
    }

    pub async fn manga_details(&self, id: &str) -> Result<MangaDetails, CoreError> {
        self.call("manga_details", || self.provider.get_manga_details(id))
            .await
    }

    pub async fn chapters(
        &self,
        id: &str,
        page: u32,
        limit: u32,
    ) -> Result<PagedResult<Chapter>, CoreError> {
        self.call("chapters", || self.provider.get_chapters(id, page, limit))
            .await
    }

    pub async fn pages(&self, manga_id: &str, chapter_id: &str) -> Result<Vec<String>, CoreError> {
        self.call("pages", || self.provider.get_pages(manga_id, chapter_id))
            .await
    }

    pub async fn download_page(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<Vec<u8>, CoreError> {
        self.call("download_page", || self.provider.download_page(url, referer))
            .await
    }

    pub async fn download_cover(&self, manga_id: &str) -> Result<Vec<u8>, CoreError> {
        self.call("download_cover", || self.provider.download_cover(manga_id))
            .await
    }

    pub async fn health_check(
        &self,
        timeout: std::time::Duration,
    ) -> Result<HealthCheckResult, CoreError> {
        self.call("health_check", || self.provider.health_check(timeout))
            .await
    }

    /// Drives one call through rate limiter → isolation → provider →
    /// metrics → rate limiter release (spec §4.3). On a rate-limit or
    /// isolation refusal, the call returns the corresponding `CoreError`
    /// unchanged and metrics record a throttle only, never a success or
    /// failure.
    async fn call<'a, F, Fut, T>(&'a self, op: &'static str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut + 'a,
        Fut: std::future::Future<Output = Result<T, ProviderError>> + 'a,
    {
        let permit = match self.rate_limiter.acquire().await {
            Ok(p) => p,
            Err(RateLimiterError::CircuitBreakerOpen) => {
                self.metrics.lock().unwrap().record_throttle();
                self.status.store(status_to_u8(AgentStatus::CircuitOpen), Ordering::Release);
                return Err(CoreError::CircuitBreakerOpen {
                    agent: self.name().to_string(),
                });
            }
            Err(RateLimiterError::RateLimitExceeded { retry_after }) => {
                self.metrics.lock().unwrap().record_throttle();
                return Err(CoreError::RateLimitExceeded {
                    agent: self.name().to_string(),
                    retry_after,
                });
            }
        };

        let start = Instant::now();
        let result = self.isolation.execute(f).await;

        match result {
            Ok(value) => {
                let elapsed = start.elapsed();
                self.rate_limiter.release(permit, true, elapsed);
                self.metrics.lock().unwrap().record_success(elapsed);
                self.status.store(status_to_u8(AgentStatus::Active), Ordering::Release);
                Ok(value)
            }
            Err(IsolationError::Quarantined { quarantine_until_secs }) => {
                // A quarantine refusal never acquired the gated call, so the
                // rate-limiter permit must still be released as a non-failure.
                self.rate_limiter.release(permit, true, start.elapsed());
                self.metrics.lock().unwrap().record_throttle();
                Err(CoreError::AgentQuarantined {
                    agent: self.name().to_string(),
                    quarantine_until_secs,
                })
            }
            Err(IsolationError::Timeout) => {
                let elapsed = start.elapsed();
                self.rate_limiter.release(permit, false, elapsed);
                self.metrics
                    .lock()
                    .unwrap()
                    .record_failure(elapsed, "operation timed out");
                self.status.store(status_to_u8(AgentStatus::Error), Ordering::Release);
                Err(CoreError::OperationTimeout(elapsed))
            }
            Err(IsolationError::Inner(ProviderError(message))) => {
                let elapsed = start.elapsed();
                self.rate_limiter.release(permit, false, elapsed);
                self.metrics
                    .lock()
                    .unwrap()
                    .record_failure(elapsed, message.clone());
                self.status.store(status_to_u8(AgentStatus::Error), Ordering::Release);
                Err(CoreError::UpstreamError {
                    context: op.to_string(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentDescriptor, HealthCheckResult, PagedResult};
    use async_trait::async_trait;
    use manga_isolation::IsolationConfig;
    use manga_ratelimiter::RateLimiterConfig;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::time::Duration;

    struct FlakyProvider {
        fail_first_n: AtomicU32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        async fn search(
            &self,
            _query: &str,
            _page: u32,
            _limit: u32,
        ) -> Result<PagedResult<SearchResult>, ProviderError> {
            if self.fail_first_n.fetch_sub(1, AtomicOrdering::SeqCst) > 0 {
                Err(ProviderError("down".into()))
            } else {
                Ok(PagedResult {
                    items: vec![],
                    total: 0,
                    has_more: false,
                })
            }
        }
        async fn get_manga_details(&self, _id: &str) -> Result<MangaDetails, ProviderError> {
            Ok(Default::default())
        }
        async fn get_chapters(
            &self,
            _id: &str,
            _page: u32,
            _limit: u32,
        ) -> Result<PagedResult<Chapter>, ProviderError> {
            Ok(PagedResult {
                items: vec![],
                total: 0,
                has_more: false,
            })
        }
        async fn get_pages(&self, _m: &str, _c: &str) -> Result<Vec<String>, ProviderError> {
            Ok(vec![])
        }
        async fn download_page(&self, _u: &str, _r: Option<&str>) -> Result<Vec<u8>, ProviderError> {
            Ok(vec![])
        }
        async fn download_cover(&self, _m: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(vec![])
        }
        async fn health_check(&self, _t: Duration) -> Result<HealthCheckResult, ProviderError> {
            Ok(HealthCheckResult {
                ok: true,
                response_time: Duration::from_millis(1),
                error: None,
            })
        }
    }

    fn make_agent(fail_first_n: u32) -> Agent {
        let descriptor = AgentDescriptor {
            name: "Test".into(),
            base_url: "https://example.invalid".into(),
            supports_nsfw: false,
            requires_flaresolverr: false,
            priority: 0,
            capabilities: vec![AgentCapability::Search],
        };
        Agent::new(
            descriptor,
            Arc::new(FlakyProvider {
                fail_first_n: AtomicU32::new(fail_first_n),
            }),
            RateLimiter::new(
                "Test",
                RateLimiterConfig::builder()
                    .min_spacing(Duration::ZERO)
                    .max_concurrent(10)
                    .build(),
            ),
            IsolationManager::new("Test", IsolationConfig::builder().consecutive_threshold(100).build()),
        )
    }

    #[tokio::test]
    async fn successful_call_keeps_status_active_and_records_metrics() {
        let agent = make_agent(0);
        let result = agent.search("naruto", 1, 10).await;
        assert!(result.is_ok());
        assert_eq!(agent.status(), AgentStatus::Active);
        assert_eq!(agent.metrics().successful_calls, 1);
    }

    #[tokio::test]
    async fn failed_call_sets_error_status_and_records_failure() {
        let agent = make_agent(1);
        let result = agent.search("naruto", 1, 10).await;
        assert!(result.is_err());
        assert_eq!(agent.status(), AgentStatus::Error);
        assert_eq!(agent.metrics().failed_calls, 1);
    }

    #[tokio::test]
    async fn admin_disable_and_enable_do_not_touch_metrics() {
        let agent = make_agent(0);
        agent.search("x", 1, 1).await.unwrap();
        let before = agent.metrics().total_calls;
        agent.set_inactive();
        assert_eq!(agent.status(), AgentStatus::Inactive);
        assert!(agent.is_healthy());
        agent.set_active();
        assert_eq!(agent.metrics().total_calls, before);
    }
}
