//! Federated provider core: wires the rate limiter, isolation manager,
//! agent registry, health monitor, progress fabric, job queue, and
//! federated search/indexing into a single running service.
//!
//! Instantiating a provider from a `class_name` string in
//! `providers_default.json` is deliberately out of scope here (spec §1
//! excludes "reimplementing upstream site parsers bit-for-bit"): callers
//! supply their own [`manga_agent::Provider`] implementations keyed by
//! agent name, and [`FederatedCoreBuilder::register_agent`] pairs each one
//! with its descriptor and runtime config.

pub mod config;

pub use manga_agent::{
    Agent, AgentCapability, AgentDescriptor, AgentRegistry, Provider, ProviderError,
};
pub use manga_core::{CoreError, CoreResult};
pub use manga_federation::{
    FederatedSearch, FederatedSearchRequest, FederatedSearchResponse, Indexer, IndexerTier,
    LibraryStatusLookup, TieredIndexer, UniversalMetadata,
};
pub use manga_health::{HealthMonitor, HealthMonitorConfig, HealthSummary};
pub use manga_isolation::{IsolationConfig, IsolationManager};
pub use manga_jobqueue::{Job, JobPriority, JobQueue, JobQueueConfig, JobStatus, JobType};
pub use manga_progress::{
    Operation, OperationStatus, ProgressEvent, ProgressTracker, ProgressTrackerBuilder,
    WebSocketBroadcaster,
};
pub use manga_ratelimiter::{RateLimiter, RateLimiterConfig};

use std::sync::Arc;

use config::{AgentRuntimeConfig, AgentRuntimeEntry};
use manga_core::ProgressSink;
use manga_progress::PersistenceSink;

/// A provider implementation paired with the descriptor it should be
/// registered under.
pub struct AgentRegistration {
    pub descriptor: AgentDescriptor,
    pub provider: Arc<dyn Provider>,
}

/// Assembles a [`FederatedCore`] from caller-supplied agents and
/// configuration.
#[derive(Default)]
pub struct FederatedCoreBuilder {
    agents: Vec<AgentRegistration>,
    runtime_config: AgentRuntimeConfig,
    health_config: Option<HealthMonitorConfig>,
    job_queue_config: Option<JobQueueConfig>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    library_lookup: Option<Arc<dyn LibraryStatusLookup>>,
    indexers: Vec<Arc<dyn Indexer>>,
    with_websocket: bool,
}

impl FederatedCoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent, to be wrapped with the rate limiter/isolation
    /// config found in `runtime_config` for its name (or the conservative
    /// defaults, if absent).
    pub fn register_agent(mut self, registration: AgentRegistration) -> Self {
        self.agents.push(registration);
        self
    }

    pub fn runtime_config(mut self, config: AgentRuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    pub fn health_config(mut self, config: HealthMonitorConfig) -> Self {
        self.health_config = Some(config);
        self
    }

    pub fn job_queue_config(mut self, config: JobQueueConfig) -> Self {
        self.job_queue_config = Some(config);
        self
    }

    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn library_lookup(mut self, lookup: Arc<dyn LibraryStatusLookup>) -> Self {
        self.library_lookup = Some(lookup);
        self
    }

    /// Adds an indexer to the tiered metadata cascade. Omit entirely if
    /// the deployment has no use for [`TieredIndexer`].
    pub fn indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexers.push(indexer);
        self
    }

    /// Enables the WebSocket progress broadcaster.
    pub fn with_websocket(mut self) -> Self {
        self.with_websocket = true;
        self
    }

    /// Builds the running core. Does not itself start any background
    /// tasks; call [`FederatedCore::start`] once construction is done.
    pub fn build(self) -> FederatedCore {
        let broadcaster = self.with_websocket.then(WebSocketBroadcaster::new);

        let mut progress_builder = ProgressTrackerBuilder::default();
        if let Some(sink) = self.persistence {
            progress_builder = progress_builder.persistence(sink);
        }
        if let Some(broadcaster) = broadcaster.clone() {
            progress_builder = progress_builder.broadcaster(broadcaster);
        }
        let progress: Arc<ProgressTracker> = Arc::new(progress_builder.build());

        let registry = Arc::new(AgentRegistry::new());
        for registration in self.agents {
            let name = registration.descriptor.name.clone();
            let entry = self.runtime_config.get(&name).cloned().unwrap_or_default();
            registry.register(build_agent(registration, &entry, progress.clone()));
        }

        let health = HealthMonitor::new(self.health_config.unwrap_or_default(), registry.clone());

        let progress_sink: Arc<dyn ProgressSink> = progress.clone();
        let job_queue = Arc::new(
            JobQueue::new(self.job_queue_config.unwrap_or_default(), registry.clone())
                .with_health_monitor(health.clone())
                .with_progress_sink(progress_sink),
        );

        let mut search = FederatedSearch::new(registry.clone(), health.clone());
        if let Some(lookup) = self.library_lookup {
            search = search.with_library_lookup(lookup);
        }

        let tiered_indexer =
            (!self.indexers.is_empty()).then(|| Arc::new(TieredIndexer::new(self.indexers)));

        FederatedCore {
            registry,
            health,
            progress,
            job_queue,
            search: Arc::new(search),
            tiered_indexer,
            broadcaster,
        }
    }
}

fn build_agent(registration: AgentRegistration, entry: &AgentRuntimeEntry, progress: Arc<ProgressTracker>) -> Agent {
    let AgentRegistration { descriptor, provider } = registration;
    let name = descriptor.name.clone();
    let descriptor = AgentDescriptor { priority: entry.priority, ..descriptor };

    let rate_limiter = RateLimiter::new(name.clone(), entry.rate_limiter_config());
    let isolation = IsolationManager::new(name.clone(), entry.isolation_config());

    let agent = Agent::new(descriptor, provider, rate_limiter, isolation).with_progress_sink(progress);
    if entry.enabled {
        agent.set_active();
    } else {
        agent.set_inactive();
    }
    agent
}

/// A fully wired federated provider core. Construct with
/// [`FederatedCoreBuilder`].
pub struct FederatedCore {
    pub registry: Arc<AgentRegistry>,
    pub health: Arc<HealthMonitor>,
    pub progress: Arc<ProgressTracker>,
    pub job_queue: Arc<JobQueue>,
    pub search: Arc<FederatedSearch>,
    pub tiered_indexer: Option<Arc<TieredIndexer>>,
    pub broadcaster: Option<Arc<WebSocketBroadcaster>>,
}

impl FederatedCore {
    pub fn builder() -> FederatedCoreBuilder {
        FederatedCoreBuilder::new()
    }

    /// Starts every background task: scheduled health checks, the job
    /// queue's scheduler and janitor, the progress tracker's cleanup task,
    /// and (if enabled) the WebSocket heartbeat.
    pub async fn start(&self) {
        self.health.start();
        self.job_queue.start();
        self.progress.start_cleanup_task();
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.start_heartbeat().await;
        }
    }

    /// Stops every background task, awaiting in-flight work to wind down.
    pub async fn stop(&self) {
        self.job_queue.stop().await;
        self.health.stop().await;
        self.progress.stop_cleanup_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use manga_agent::{Chapter, HealthCheckResult, MangaDetails, PagedResult, SearchResult};
    use std::collections::HashMap;
    use std::time::Duration;

    struct StubProvider;

    #[async_trait]
    impl Provider for StubProvider {
        async fn search(&self, _q: &str, _p: u32, _l: u32) -> Result<PagedResult<SearchResult>, ProviderError> {
            Ok(PagedResult { items: vec![], total: 0, has_more: false })
        }
        async fn get_manga_details(&self, _id: &str) -> Result<MangaDetails, ProviderError> {
            Ok(HashMap::new())
        }
        async fn get_chapters(&self, _id: &str, _p: u32, _l: u32) -> Result<PagedResult<Chapter>, ProviderError> {
            Ok(PagedResult { items: vec![], total: 0, has_more: false })
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
            Ok(HealthCheckResult { ok: true, response_time: Duration::from_millis(1), error: None })
        }
    }

    fn descriptor(name: &str) -> AgentDescriptor {
        AgentDescriptor {
            name: name.to_string(),
            base_url: "https://example.invalid".into(),
            supports_nsfw: false,
            requires_flaresolverr: false,
            priority: 999,
            capabilities: vec![AgentCapability::Search],
        }
    }

    #[tokio::test]
    async fn builds_and_starts_and_stops_a_core_with_one_agent() {
        let core = FederatedCore::builder()
            .register_agent(AgentRegistration {
                descriptor: descriptor("stub"),
                provider: Arc::new(StubProvider),
            })
            .build();

        assert!(core.registry.get("stub").is_some());
        core.start().await;
        let response = core
            .search
            .search(FederatedSearchRequest {
                query: "anything".into(),
                page: 1,
                limit: 10,
                user_id: None,
                favorite_providers: vec![],
            })
            .await;
        assert_eq!(response.page, 1);
        core.stop().await;
    }

    #[test]
    fn runtime_config_priority_overrides_the_registered_descriptor() {
        let mut runtime_config = AgentRuntimeConfig::new();
        runtime_config.insert("stub".to_string(), AgentRuntimeEntry { priority: 3, ..AgentRuntimeEntry::default() });

        let core = FederatedCore::builder()
            .register_agent(AgentRegistration {
                descriptor: descriptor("stub"),
                provider: Arc::new(StubProvider),
            })
            .runtime_config(runtime_config)
            .build();

        assert_eq!(core.registry.get("stub").unwrap().descriptor().priority, 3);
    }

    #[test]
    fn disabled_runtime_entry_registers_an_inactive_agent() {
        let mut runtime_config = AgentRuntimeConfig::new();
        runtime_config.insert("stub".to_string(), AgentRuntimeEntry { enabled: false, ..AgentRuntimeEntry::default() });

        let core = FederatedCore::builder()
            .register_agent(AgentRegistration {
                descriptor: descriptor("stub"),
                provider: Arc::new(StubProvider),
            })
            .runtime_config(runtime_config)
            .build();

        assert_eq!(core.registry.get("stub").unwrap().status(), manga_agent::AgentStatus::Inactive);
    }
}
