//! Preference-ordered fan-out search across every registered agent, with
//! dedup, relevance ranking, and post-merge pagination (spec §4.10,
//! component C10).
//!
//! Grounded on `enhanced_tiered_search.py::EnhancedTieredSearchService.search`
//! for the overall shape (cache check dropped per the TieredIndexer's own
//! cache, fan-out / merge / paginate kept), adapted to query live agents
//! instead of a database-backed cache of indexer results.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use manga_agent::{Agent, AgentRegistry, SearchResult};
use manga_health::HealthMonitor;

/// Per-call timeout FederatedSearch applies on top of whatever the agent's
/// own `IsolationManager` enforces (spec §5: "FederatedSearch overrides to
/// 15 s" against the 30 s default).
const PER_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on how many non-favorite agents are fanned out to.
const MAX_FANOUT_AGENTS: usize = 20;

/// Looks up which of a batch of `(provider, external_id)` pairs are already
/// in a user's library (spec §6, optional output dependency). Falls back to
/// title matching when no `(provider, external_id)` hit is found.
///
/// This has no in-tree implementation: the library itself lives outside
/// this crate's scope. Callers that have one wire it in; `FederatedSearch`
/// works without one and simply leaves every result's `in_library` as-is.
#[async_trait]
pub trait LibraryStatusLookup: Send + Sync {
    async fn in_library(&self, user_id: &str, external_ids: &[(String, String)]) -> HashSet<(String, String)>;
    async fn in_library_by_title(&self, user_id: &str, titles: &[String]) -> HashSet<String>;
}

#[derive(Debug, Clone)]
pub struct FederatedSearchRequest {
    pub query: String,
    pub page: u32,
    pub limit: u32,
    pub user_id: Option<String>,
    /// Provider names the user has marked as favorites; these are fanned
    /// out to first and are never capped by [`MAX_FANOUT_AGENTS`].
    pub favorite_providers: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FederatedSearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub has_next: bool,
}

/// Orchestrates a search across every registered, healthy agent.
pub struct FederatedSearch {
    registry: Arc<AgentRegistry>,
    health: Arc<HealthMonitor>,
    library: Option<Arc<dyn LibraryStatusLookup>>,
}

impl FederatedSearch {
    pub fn new(registry: Arc<AgentRegistry>, health: Arc<HealthMonitor>) -> Self {
        Self { registry, health, library: None }
    }

    pub fn with_library_lookup(mut self, library: Arc<dyn LibraryStatusLookup>) -> Self {
        self.library = Some(library);
        self
    }

    pub async fn search(&self, request: FederatedSearchRequest) -> FederatedSearchResponse {
        let agents = self.order_agents(&request.favorite_providers);
        if agents.is_empty() {
            return FederatedSearchResponse {
                page: request.page,
                limit: request.limit,
                ..Default::default()
            };
        }

        let needed = (request.page as u64) * (request.limit as u64);
        let results_per_provider = request.limit.max(20).min(50);
        let n = agents.len() as u64;
        let max_pages_per_provider = (needed.div_ceil(n * results_per_provider as u64) + 1).min(3) as u32;

        let fanout = futures::future::join_all(
            agents
                .iter()
                .map(|agent| self.fan_out_one(agent.clone(), &request.query, results_per_provider, max_pages_per_provider)),
        )
        .await;

        let has_more_any = fanout.iter().any(|(_, has_more)| *has_more);
        let merged: Vec<SearchResult> = fanout.into_iter().flat_map(|(items, _)| items).collect();

        let deduped = dedupe_by_title_and_provider(merged);
        let ranked = rank_by_relevance(deduped, &request.query);

        let total = ranked.len();
        let offset = ((request.page.saturating_sub(1)) as usize) * (request.limit as usize);
        let end = (offset + request.limit as usize).min(total);
        let mut page_results: Vec<SearchResult> = if offset < total { ranked[offset..end].to_vec() } else { Vec::new() };

        if let (Some(library), Some(user_id)) = (&self.library, &request.user_id) {
            self.tag_in_library(library.as_ref(), user_id, &mut page_results).await;
        }

        FederatedSearchResponse {
            results: page_results,
            total,
            page: request.page,
            limit: request.limit,
            has_next: (offset + request.limit as usize < total) || has_more_any,
        }
    }

    /// Favorites first (in caller-given order), then the rest ordered by
    /// health rank, capped at [`MAX_FANOUT_AGENTS`] (spec §4.10 step 1).
    fn order_agents(&self, favorites: &[String]) -> Vec<Arc<Agent>> {
        let all = self.registry.all();
        let favorite_set: HashSet<String> = favorites.iter().map(|f| f.to_lowercase()).collect();

        let mut favored: Vec<Arc<Agent>> = Vec::new();
        for name in favorites {
            if let Some(agent) = all.iter().find(|a| a.name().eq_ignore_ascii_case(name)) {
                favored.push(agent.clone());
            }
        }

        let ranking = self.health.provider_ranking();
        let mut rest: Vec<Arc<Agent>> = all
            .into_iter()
            .filter(|a| !favorite_set.contains(&a.name().to_lowercase()))
            .collect();
        rest.sort_by(|a, b| {
            let score = |name: &str| {
                ranking
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, s)| *s)
                    .unwrap_or(0.0)
            };
            score(b.name()).partial_cmp(&score(a.name())).unwrap_or(std::cmp::Ordering::Equal)
        });
        rest.truncate(MAX_FANOUT_AGENTS);

        favored.extend(rest);
        favored
    }

    /// Fans out across this agent's pages, returning the collected items
    /// plus whether the last page actually fetched reported `has_more`
    /// (spec §4.10 step 3: stop that agent early on a short page, error, or
    /// timeout; the merged response's own `has_next` folds this in rather
    /// than re-querying every agent a second time).
    async fn fan_out_one(&self, agent: Arc<Agent>, query: &str, results_per_provider: u32, max_pages: u32) -> (Vec<SearchResult>, bool) {
        let mut collected = Vec::new();
        let mut has_more = false;
        for page in 1..=max_pages {
            let call = agent.search(query, page, results_per_provider);
            let outcome = tokio::time::timeout(PER_CALL_TIMEOUT, call).await;
            let page_results = match outcome {
                Ok(Ok(paged)) => paged,
                Ok(Err(_err)) | Err(_) => {
                    has_more = false;
                    break;
                }
            };
            let got = page_results.items.len() as u32;
            has_more = page_results.has_more;
            collected.extend(page_results.items);
            if got < results_per_provider {
                has_more = false;
                break;
            }
        }
        (collected, has_more)
    }

    async fn tag_in_library(&self, library: &dyn LibraryStatusLookup, user_id: &str, results: &mut [SearchResult]) {
        let external_ids: Vec<(String, String)> =
            results.iter().map(|r| (r.provider.clone(), r.id.clone())).collect();
        let by_id = library.in_library(user_id, &external_ids).await;

        let unresolved_titles: Vec<String> = results
            .iter()
            .zip(&external_ids)
            .filter(|(_, key)| !by_id.contains(key))
            .map(|(r, _)| r.title.clone())
            .collect();
        let by_title = if unresolved_titles.is_empty() {
            HashSet::new()
        } else {
            library.in_library_by_title(user_id, &unresolved_titles).await
        };

        for (result, key) in results.iter_mut().zip(external_ids) {
            result.in_library = by_id.contains(&key) || by_title.contains(&result.title);
        }
    }
}

/// Dedup by `(lower(title), provider)`, keeping the first occurrence
/// (spec §4.10 step 5 — stable order).
fn dedupe_by_title_and_provider(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert((r.title.to_lowercase(), r.provider.clone())))
        .collect()
}

/// Ranks by substring position of the query within the title, else a
/// sentinel of 1000; ties keep insertion order (spec §4.10 step 6).
fn rank_by_relevance(results: Vec<SearchResult>, query: &str) -> Vec<SearchResult> {
    let query_lower = query.to_lowercase();
    let mut keyed: Vec<(usize, usize, SearchResult)> = results
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let title_lower = r.title.to_lowercase();
            let key = title_lower.find(&query_lower).unwrap_or(1000);
            (key, i, r)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, _, r)| r).collect()
}
