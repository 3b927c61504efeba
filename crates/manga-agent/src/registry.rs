//! Keeps every configured agent addressable by name and ranked by
//! capability (spec §4.4, component C4).

use crate::agent::Agent;
use crate::types::{AgentCapability, AgentStatus};
use manga_core::CoreError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of all configured agents, keyed case-insensitively by name.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an agent. Re-registering the same name replaces the
    /// previous entry (idempotent from the caller's perspective).
    pub fn register(&self, agent: Agent) -> Arc<Agent> {
        let key = agent.descriptor().key();
        let agent = Arc::new(agent);
        self.agents.write().unwrap().insert(key, agent.clone());
        agent
    }

    /// Removes an agent by name. Returns it if it was present.
    pub fn unregister(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.write().unwrap().remove(&name.to_lowercase())
    }

    /// Looks up an agent by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.read().unwrap().get(&name.to_lowercase()).cloned()
    }

    /// Snapshot of all registered agents, sorted by descriptor priority
    /// then by name for stable ordering.
    pub fn all(&self) -> Vec<Arc<Agent>> {
        let mut agents: Vec<_> = self.agents.read().unwrap().values().cloned().collect();
        agents.sort_by(|a, b| {
            a.descriptor()
                .priority
                .cmp(&b.descriptor().priority)
                .then_with(|| a.name().cmp(b.name()))
        });
        agents
    }

    /// All healthy, registered agents that declare `cap`.
    pub fn by_capability(&self, cap: AgentCapability) -> Vec<Arc<Agent>> {
        self.all()
            .into_iter()
            .filter(|a| a.has_capability(cap) && a.is_healthy())
            .collect()
    }

    /// The best agent for `cap`, ranked by success rate descending, then by
    /// average response time ascending (spec §4.4 ranking rule). Agents
    /// that are not healthy, or that lack the capability, are excluded.
    pub fn best_for(&self, cap: AgentCapability) -> Option<Arc<Agent>> {
        self.by_capability(cap).into_iter().max_by(|a, b| {
            let ma = a.metrics();
            let mb = b.metrics();
            ma.success_rate()
                .partial_cmp(&mb.success_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| mb.avg_response_time.cmp(&ma.avg_response_time))
        })
    }

    /// Administratively enables an agent.
    pub fn enable(&self, name: &str) -> Result<(), CoreError> {
        let agent = self
            .get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        agent.set_active();
        Ok(())
    }

    /// Administratively disables an agent.
    pub fn disable(&self, name: &str) -> Result<(), CoreError> {
        let agent = self
            .get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        agent.set_inactive();
        Ok(())
    }

    /// Count of agents whose status is `CircuitOpen`.
    pub fn circuit_open_count(&self) -> usize {
        self.all()
            .iter()
            .filter(|a| a.status() == AgentStatus::CircuitOpen)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Provider, ProviderError};
    use crate::types::{
        AgentDescriptor, Chapter, HealthCheckResult, MangaDetails, PagedResult, SearchResult,
    };
    use async_trait::async_trait;
    use manga_isolation::{IsolationConfig, IsolationManager};
    use manga_ratelimiter::{RateLimiter, RateLimiterConfig};
    use std::time::Duration;

    struct Stub;

    #[async_trait]
    impl Provider for Stub {
        async fn search(
            &self,
            _q: &str,
            _p: u32,
            _l: u32,
        ) -> Result<PagedResult<SearchResult>, ProviderError> {
            Ok(PagedResult {
                items: vec![],
                total: 0,
                has_more: false,
            })
        }
        async fn get_manga_details(&self, _id: &str) -> Result<MangaDetails, ProviderError> {
            Ok(Default::default())
        }
        async fn get_chapters(
            &self,
            _id: &str,
            _p: u32,
            _l: u32,
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

    fn make(name: &str, priority: i32, cap: AgentCapability) -> Agent {
        Agent::new(
            AgentDescriptor {
                name: name.to_string(),
                base_url: "https://example.invalid".into(),
                supports_nsfw: false,
                requires_flaresolverr: false,
                priority,
                capabilities: vec![cap],
            },
            Arc::new(Stub),
            RateLimiter::new(name, RateLimiterConfig::builder().min_spacing(Duration::ZERO).build()),
            IsolationManager::new(name, IsolationConfig::builder().build()),
        )
    }

    #[test]
    fn register_and_lookup_is_case_insensitive() {
        let registry = AgentRegistry::new();
        registry.register(make("MangaDex", 0, AgentCapability::Search));
        assert!(registry.get("mangadex").is_some());
        assert!(registry.get("MANGADEX").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn by_capability_filters_to_healthy_matching_agents() {
        let registry = AgentRegistry::new();
        registry.register(make("A", 0, AgentCapability::Search));
        registry.register(make("B", 1, AgentCapability::DownloadPage));
        let found = registry.by_capability(AgentCapability::Search);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "A");
    }

    #[test]
    fn disable_removes_agent_from_healthy_results_but_not_by_capability() {
        let registry = AgentRegistry::new();
        registry.register(make("A", 0, AgentCapability::Search));
        registry.disable("A").unwrap();
        // Inactive still counts as healthy (spec §4.3).
        assert_eq!(registry.by_capability(AgentCapability::Search).len(), 1);
    }

    #[tokio::test]
    async fn best_for_prefers_higher_success_rate() {
        let registry = AgentRegistry::new();
        let a = registry.register(make("A", 0, AgentCapability::Search));
        let flaky = registry.register(Agent::new(
            AgentDescriptor {
                name: "Flaky".into(),
                base_url: "https://example.invalid".into(),
                supports_nsfw: false,
                requires_flaresolverr: false,
                priority: 0,
                capabilities: vec![AgentCapability::Search],
            },
            Arc::new(FailOnce::default()),
            RateLimiter::new("Flaky", RateLimiterConfig::builder().min_spacing(Duration::ZERO).build()),
            IsolationManager::new("Flaky", IsolationConfig::builder().consecutive_threshold(100).build()),
        ));
        a.search("x", 1, 1).await.unwrap();
        let _ = flaky.search("x", 1, 1).await;
        flaky.search("y", 1, 1).await.unwrap();

        let best = registry.best_for(AgentCapability::Search).unwrap();
        assert_eq!(best.name(), "A");
    }

    #[derive(Default)]
    struct FailOnce {
        called: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Provider for FailOnce {
        async fn search(
            &self,
            _q: &str,
            _p: u32,
            _l: u32,
        ) -> Result<PagedResult<SearchResult>, ProviderError> {
            if !self.called.swap(true, std::sync::atomic::Ordering::SeqCst) {
                Err(ProviderError("down once".into()))
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
            _p: u32,
            _l: u32,
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
}
