//! Scheduled health checks across every registered agent, provider ranking,
//! and auto-disable on sustained failure (spec §4.5, component C5).
//!
//! Grounded on `jobs/health_monitor.py::EnhancedHealthMonitor` (per-provider
//! metrics, auto-disable, ranking) and `agents/monitoring.py` (bounded
//! concurrent checks via a semaphore).

use crate::config::HealthMonitorConfig;
use crate::metrics::{HealthMetrics, HealthStatus};
use manga_agent::AgentRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bound on concurrent in-flight checks (spec: "limit concurrent health checks").
const MAX_CONCURRENT_CHECKS: usize = 5;

/// Summary snapshot across all monitored providers.
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub total_providers: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub disabled: usize,
    pub overall_health_percentage: f64,
    pub monitoring_active: bool,
}

/// Scheduled health monitor over an [`AgentRegistry`].
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    registry: Arc<AgentRegistry>,
    metrics: Mutex<HashMap<String, HealthMetrics>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig, registry: Arc<AgentRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            metrics: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    /// Starts the background scheduling loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            while this.running.load(Ordering::SeqCst) {
                this.check_all().await;
                tokio::time::sleep(this.config.check_interval).await;
            }
        });
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Stops the background loop and waits for it to finish.
    pub async fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Runs one round of checks across every registered agent, bounded to
    /// [`MAX_CONCURRENT_CHECKS`] in flight.
    pub async fn check_all(&self) {
        let agents = self.registry.all();
        if agents.is_empty() {
            return;
        }
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CHECKS));
        let mut handles = Vec::with_capacity(agents.len());
        for agent in agents {
            let semaphore = semaphore.clone();
            handles.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let name = agent.name().to_string();
                match agent.health_check(Duration::from_secs(30)).await {
                    Ok(result) if result.ok => (name, true, result.response_time, None),
                    Ok(result) => (name, false, result.response_time, result.error),
                    Err(e) => (name, false, Duration::ZERO, Some(e.user_message())),
                }
            });
        }
        let outcomes = futures::future::join_all(handles).await;
        for (name, success, response_time, error) in outcomes {
            self.record(&name, success, response_time, error);
        }
    }

    /// Feeds an externally-performed check (e.g. a `HealthCheckWorker` job)
    /// into this provider's metrics, applying the same auto-disable policy
    /// as a scheduled check.
    pub fn record_external(&self, name: &str, success: bool, response_time: Duration, error: Option<String>) {
        self.record(name, success, response_time, error)
    }

    fn record(&self, name: &str, success: bool, response_time: Duration, error: Option<String>) {
        let mut metrics = self.metrics.lock().unwrap();
        let entry = metrics.entry(name.to_string()).or_insert_with(|| {
            HealthMetrics::new(name, self.config.degraded_threshold, self.config.failure_threshold)
        });

        if success {
            entry.record_success(response_time);
        } else {
            entry.record_failure(error.unwrap_or_else(|| "unknown error".to_string()));
        }

        let should_auto_disable =
            entry.consecutive_failures >= self.config.failure_threshold && !entry.auto_disabled;
        if should_auto_disable {
            entry.disable(true);
            drop(metrics);
            let _ = self.registry.disable(name);
            #[cfg(feature = "tracing")]
            tracing::warn!(provider = %name, "auto-disabled after consecutive health check failures");
        }
    }

    /// Snapshot of a single provider's health metrics.
    pub fn get(&self, name: &str) -> Option<HealthMetrics> {
        self.metrics.lock().unwrap().get(name).cloned()
    }

    /// Names of providers currently `Healthy`.
    pub fn healthy_providers(&self) -> Vec<String> {
        self.metrics
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.status == HealthStatus::Healthy)
            .map(|m| m.provider_name.clone())
            .collect()
    }

    /// Providers ranked by health score descending, excluding disabled ones
    /// (spec §4.5, used by FederatedSearch's fallback prioritization).
    pub fn provider_ranking(&self) -> Vec<(String, f64)> {
        let metrics = self.metrics.lock().unwrap();
        let mut ranking: Vec<(String, f64)> = metrics
            .values()
            .filter(|m| m.status != HealthStatus::Disabled)
            .map(|m| (m.provider_name.clone(), m.health_score()))
            .collect();
        ranking.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranking
    }

    /// Administratively disables a provider both here and in the registry.
    pub fn disable_provider(&self, name: &str, reason: &str) {
        let mut metrics = self.metrics.lock().unwrap();
        if let Some(entry) = metrics.get_mut(name) {
            entry.disable(false);
        }
        drop(metrics);
        let _ = self.registry.disable(name);
        #[cfg(feature = "tracing")]
        tracing::info!(provider = %name, reason, "provider disabled");
    }

    /// Re-enables a provider, resetting counters and scheduling an
    /// immediate re-check on the next loop iteration.
    pub fn enable_provider(&self, name: &str) {
        let mut metrics = self.metrics.lock().unwrap();
        if let Some(entry) = metrics.get_mut(name) {
            entry.enable();
        }
        drop(metrics);
        let _ = self.registry.enable(name);
    }

    /// Aggregate counts across all monitored providers.
    pub fn summary(&self) -> HealthSummary {
        let metrics = self.metrics.lock().unwrap();
        let total = metrics.len();
        let count = |s: HealthStatus| metrics.values().filter(|m| m.status == s).count();
        let healthy = count(HealthStatus::Healthy);
        HealthSummary {
            total_providers: total,
            healthy,
            degraded: count(HealthStatus::Degraded),
            unhealthy: count(HealthStatus::Unhealthy),
            disabled: count(HealthStatus::Disabled),
            overall_health_percentage: (healthy as f64 / total.max(1) as f64) * 100.0,
            monitoring_active: self.running.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use manga_agent::{
        Agent, AgentCapability, AgentDescriptor, Chapter, HealthCheckResult, MangaDetails,
        PagedResult, Provider, ProviderError, SearchResult,
    };
    use manga_isolation::{IsolationConfig, IsolationManager};
    use manga_ratelimiter::{RateLimiter, RateLimiterConfig};
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    struct AlwaysFails;

    #[async_trait]
    impl Provider for AlwaysFails {
        async fn search(&self, _q: &str, _p: u32, _l: u32) -> Result<PagedResult<SearchResult>, ProviderError> {
            unreachable!()
        }
        async fn get_manga_details(&self, _id: &str) -> Result<MangaDetails, ProviderError> {
            unreachable!()
        }
        async fn get_chapters(&self, _id: &str, _p: u32, _l: u32) -> Result<PagedResult<Chapter>, ProviderError> {
            unreachable!()
        }
        async fn get_pages(&self, _m: &str, _c: &str) -> Result<Vec<String>, ProviderError> {
            unreachable!()
        }
        async fn download_page(&self, _u: &str, _r: Option<&str>) -> Result<Vec<u8>, ProviderError> {
            unreachable!()
        }
        async fn download_cover(&self, _m: &str) -> Result<Vec<u8>, ProviderError> {
            unreachable!()
        }
        async fn health_check(&self, _t: Duration) -> Result<HealthCheckResult, ProviderError> {
            Ok(HealthCheckResult {
                ok: false,
                response_time: Duration::from_millis(5),
                error: Some("down".into()),
            })
        }
    }

    fn flaky_agent(name: &str) -> Agent {
        Agent::new(
            AgentDescriptor {
                name: name.to_string(),
                base_url: "https://example.invalid".into(),
                supports_nsfw: false,
                requires_flaresolverr: false,
                priority: 0,
                capabilities: vec![AgentCapability::HealthCheck],
            },
            Arc::new(AlwaysFails),
            RateLimiter::new(name, RateLimiterConfig::builder().min_spacing(Duration::ZERO).build()),
            IsolationManager::new(name, IsolationConfig::builder().consecutive_threshold(100).build()),
        )
    }

    #[tokio::test]
    async fn repeated_failures_auto_disable_and_sync_registry() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(flaky_agent("flaky"));

        let monitor = HealthMonitor::new(
            HealthMonitorConfig {
                failure_threshold: 3,
                ..Default::default()
            },
            registry.clone(),
        );

        for _ in 0..3 {
            monitor.check_all().await;
        }

        let metrics = monitor.get("flaky").unwrap();
        assert!(metrics.auto_disabled);
        assert_eq!(registry.get("flaky").unwrap().status(), manga_agent::AgentStatus::Inactive);
        let _ = StdAtomicBool::new(false);
    }

    #[test]
    fn provider_ranking_excludes_disabled() {
        let registry = Arc::new(AgentRegistry::new());
        let monitor = HealthMonitor::new(HealthMonitorConfig::default(), registry);
        {
            let mut metrics = monitor.metrics.lock().unwrap();
            let mut a = HealthMetrics::new("a", 3, 5);
            a.record_success(Duration::from_millis(10));
            metrics.insert("a".into(), a);
            let mut b = HealthMetrics::new("b", 3, 5);
            b.disable(true);
            metrics.insert("b".into(), b);
        }
        let ranking = monitor.provider_ranking();
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].0, "a");
    }
}
