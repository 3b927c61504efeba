//! Three-tier metadata cascade with cross-reference scoring (spec §4.11,
//! component C11).
//!
//! Grounded on `tiered_indexing.py`'s `BaseIndexer`/`TieredSearchService`:
//! the `{search, get_details, test_connection}` interface, tier-ordered
//! fallback search, title-based dedup, and the weighted cross-reference
//! similarity score all mirror that file. Unlike the original, indexer
//! implementations (HTTP calls, HTML scraping) are supplied by the caller
//! through the [`Indexer`] trait rather than hard-coded per-site clients;
//! that concern belongs to the agents in `manga-agent`, not here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use manga_core::error::CoreError;
use tokio::sync::Mutex as AsyncMutex;

/// Pause between tiers so as not to hammer every upstream back-to-back
/// (spec §4.11 step 2, `tiered_search_service`'s `asyncio.sleep(0.5)`).
const INTER_TIER_PAUSE: Duration = Duration::from_millis(500);

/// TTL for the primary indexer's search cache (spec §4.11 "rate discipline").
const PRIMARY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Minimum spacing between the primary indexer's write/update operations
/// only; search/read calls are unthrottled (spec §4.11).
const PRIMARY_UPDATE_SPACING: Duration = Duration::from_secs(5);

/// Cross-reference candidates below this similarity are discarded.
const CROSS_REFERENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexerTier {
    Primary = 1,
    Secondary = 2,
    Tertiary = 3,
}

/// Metadata schema shared across every indexer tier, accommodating
/// whatever subset of fields a given source actually provides.
#[derive(Debug, Clone, Default)]
pub struct UniversalMetadata {
    pub title: String,
    pub alternative_titles: HashMap<String, String>,
    pub description: Option<String>,
    pub cover_image_url: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub year: Option<i32>,
    pub is_nsfw: bool,
    pub content_rating: Option<String>,
    pub demographic: Option<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub rating: Option<f64>,
    pub latest_chapter: Option<String>,
    pub source_indexer: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub confidence_score: f64,
}

/// An indexer tier's upstream capability, independent of how it actually
/// fetches data (spec §4.11: `{search, get_details, test_connection}`).
#[async_trait]
pub trait Indexer: Send + Sync {
    fn name(&self) -> &str;
    fn tier(&self) -> IndexerTier;
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<UniversalMetadata>, CoreError>;
    async fn get_details(&self, source_id: &str) -> Result<Option<UniversalMetadata>, CoreError>;
    async fn test_connection(&self) -> (bool, Option<String>);
}

/// Per-primary-indexer rate discipline: serializes write/update spacing and
/// caches recent search queries (spec §4.11's `MangaUpdatesIndexer`).
pub struct PrimaryIndexerGuard {
    last_update: AsyncMutex<Option<Instant>>,
    cache: AsyncMutex<HashMap<String, (Instant, Vec<UniversalMetadata>)>>,
}

impl Default for PrimaryIndexerGuard {
    fn default() -> Self {
        Self { last_update: AsyncMutex::new(None), cache: AsyncMutex::new(HashMap::new()) }
    }
}

impl PrimaryIndexerGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until at least [`PRIMARY_UPDATE_SPACING`] has elapsed since
    /// the previous update, then records this call as the new high-water
    /// mark. Only call this around write/update operations, never search.
    pub async fn throttle_update(&self) {
        let mut last = self.last_update.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < PRIMARY_UPDATE_SPACING {
                tokio::time::sleep(PRIMARY_UPDATE_SPACING - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn cached_search(&self, query: &str, limit: u32) -> Option<Vec<UniversalMetadata>> {
        let key = format!("{}:{limit}", query.to_lowercase());
        let cache = self.cache.lock().await;
        cache.get(&key).and_then(|(stamped, results)| {
            if stamped.elapsed() < PRIMARY_CACHE_TTL {
                Some(results.clone())
            } else {
                None
            }
        })
    }

    pub async fn store_search(&self, query: &str, limit: u32, results: Vec<UniversalMetadata>) {
        let key = format!("{}:{limit}", query.to_lowercase());
        self.cache.lock().await.insert(key, (Instant::now(), results));
    }
}

/// Dispatches searches across a primary/secondary/tertiary indexer cascade.
pub struct TieredIndexer {
    indexers: Vec<Arc<dyn Indexer>>,
}

impl TieredIndexer {
    /// Builds a dispatcher, sorting indexers into tier order regardless of
    /// the order they were supplied in.
    pub fn new(mut indexers: Vec<Arc<dyn Indexer>>) -> Self {
        indexers.sort_by_key(|i| i.tier());
        Self { indexers }
    }

    /// Tier-ordered cascade: queries the primary first; if it already has
    /// `min_results` and `use_fallback` is false, stops there. Otherwise
    /// continues through the remaining tiers, pausing between each (spec
    /// §4.11 steps 1-2).
    pub async fn search(&self, query: &str, limit: u32, use_fallback: bool, min_results: usize) -> Vec<UniversalMetadata> {
        let mut all_results = Vec::new();

        for (i, indexer) in self.indexers.iter().enumerate() {
            match indexer.search(query, limit).await {
                Ok(results) if !results.is_empty() => {
                    let is_primary = indexer.tier() == IndexerTier::Primary;
                    let got = results.len();
                    all_results.extend(results);
                    if is_primary && got >= min_results && !use_fallback {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_err) => {}
            }
            if i + 1 < self.indexers.len() {
                tokio::time::sleep(INTER_TIER_PAUSE).await;
            }
        }

        let deduped = dedupe_by_normalized_title(all_results);
        let mut sorted = sort_by_tier_and_confidence(deduped);
        sorted.truncate(limit as usize);
        sorted
    }

    pub async fn get_details(&self, source_indexer: &str, source_id: &str) -> Result<Option<UniversalMetadata>, CoreError> {
        match self.indexers.iter().find(|i| i.name().eq_ignore_ascii_case(source_indexer)) {
            Some(indexer) => indexer.get_details(source_id).await,
            None => Err(CoreError::NotFound(format!("indexer '{source_indexer}' not known"))),
        }
    }

    pub async fn test_all(&self) -> Vec<(String, bool, Option<String>)> {
        let mut out = Vec::with_capacity(self.indexers.len());
        for indexer in &self.indexers {
            let (ok, message) = indexer.test_connection().await;
            out.push((indexer.name().to_string(), ok, message));
        }
        out
    }

    /// Cross-references `target` against every other indexer by title and
    /// up to two alternative titles, keeping the best candidate per indexer
    /// that clears [`CROSS_REFERENCE_THRESHOLD`] (spec §4.11 "Cross-reference").
    pub async fn cross_reference(&self, target: &UniversalMetadata) -> HashMap<String, UniversalMetadata> {
        let mut cross_references = HashMap::new();
        cross_references.insert(target.source_indexer.clone(), target.clone());

        let mut search_terms = vec![target.title.clone()];
        search_terms.extend(target.alternative_titles.values().cloned());
        search_terms.truncate(3);

        for indexer in &self.indexers {
            if indexer.name().eq_ignore_ascii_case(&target.source_indexer) {
                continue;
            }
            let mut best: Option<(f64, UniversalMetadata)> = None;
            for term in &search_terms {
                let Ok(candidates) = indexer.search(term, 5).await else { continue };
                for candidate in candidates {
                    let score = similarity_score(target, &candidate);
                    if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                        best = Some((score, candidate));
                    }
                }
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            if let Some((score, mut candidate)) = best {
                if score >= CROSS_REFERENCE_THRESHOLD {
                    candidate.confidence_score = score;
                    cross_references.insert(indexer.name().to_lowercase(), candidate);
                }
            }
        }

        cross_references
    }
}

/// Strips punctuation, collapses whitespace, and lower-cases a title for
/// dedup comparison (spec §4.11 step 3).
fn normalize_title(title: &str) -> String {
    let stripped: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn dedupe_by_normalized_title(results: Vec<UniversalMetadata>) -> Vec<UniversalMetadata> {
    let mut by_key: HashMap<String, UniversalMetadata> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for result in results {
        let key = normalize_title(&result.title);
        match by_key.get(&key) {
            Some(existing) if existing.confidence_score >= result.confidence_score => {}
            Some(_) => {
                by_key.insert(key, result);
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, result);
            }
        }
    }
    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}

fn tier_priority(source_indexer: &str) -> u8 {
    match source_indexer.to_lowercase().as_str() {
        "mangaupdates" => 1,
        "madaradex" => 2,
        "mangadex" => 3,
        _ => 255,
    }
}

/// Sorts by `(tier_priority, −confidence, −len(description), title)`
/// (spec §4.11 step 4).
fn sort_by_tier_and_confidence(mut results: Vec<UniversalMetadata>) -> Vec<UniversalMetadata> {
    results.sort_by(|a, b| {
        tier_priority(&a.source_indexer)
            .cmp(&tier_priority(&b.source_indexer))
            .then_with(|| b.confidence_score.partial_cmp(&a.confidence_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| {
                let a_len = a.description.as_deref().unwrap_or("").len();
                let b_len = b.description.as_deref().unwrap_or("").len();
                b_len.cmp(&a_len)
            })
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
    });
    results
}

/// Weighted similarity: `0.5·title + 0.2·best_alt + 0.1·year + 0.1·type +
/// 0.1·genre_overlap` (spec §4.11 "Cross-reference"). String similarity
/// uses a normalized edit-distance ratio in place of Python's
/// `difflib.SequenceMatcher`; genre overlap is Jaccard.
fn similarity_score(target: &UniversalMetadata, candidate: &UniversalMetadata) -> f64 {
    let mut score = 0.0;

    let title_sim = text_ratio(&normalize_title(&target.title), &normalize_title(&candidate.title));
    score += title_sim * 0.5;

    if !target.alternative_titles.is_empty() && !candidate.alternative_titles.is_empty() {
        let best_alt = target
            .alternative_titles
            .values()
            .flat_map(|t| candidate.alternative_titles.values().map(move |c| (t, c)))
            .map(|(t, c)| text_ratio(&normalize_title(t), &normalize_title(c)))
            .fold(0.0_f64, f64::max);
        score += best_alt * 0.2;
    }

    if let (Some(ty), Some(cy)) = (target.year, candidate.year) {
        let diff = (ty - cy).abs();
        if diff <= 1 {
            score += 0.1;
        } else if diff <= 2 {
            score += 0.05;
        }
    }

    if let (Some(tk), Some(ck)) = (&target.kind, &candidate.kind) {
        if tk.eq_ignore_ascii_case(ck) {
            score += 0.1;
        }
    }

    if !target.genres.is_empty() && !candidate.genres.is_empty() {
        score += genre_jaccard(&target.genres, &candidate.genres) * 0.1;
    }

    score.min(1.0)
}

fn text_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b)
}

fn genre_jaccard(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let a: HashSet<String> = a.iter().map(|g| g.to_lowercase()).collect();
    let b: HashSet<String> = b.iter().map(|g| g.to_lowercase()).collect();
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn meta(title: &str, source: &str, confidence: f64) -> UniversalMetadata {
        UniversalMetadata {
            title: title.to_string(),
            source_indexer: source.to_string(),
            source_id: title.to_lowercase(),
            confidence_score: confidence,
            ..Default::default()
        }
    }

    struct StaticIndexer {
        name: &'static str,
        tier: IndexerTier,
        results: Vec<UniversalMetadata>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Indexer for StaticIndexer {
        fn name(&self) -> &str {
            self.name
        }
        fn tier(&self) -> IndexerTier {
            self.tier
        }
        async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<UniversalMetadata>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.results.clone())
        }
        async fn get_details(&self, source_id: &str) -> Result<Option<UniversalMetadata>, CoreError> {
            Ok(self.results.iter().find(|m| m.source_id == source_id).cloned())
        }
        async fn test_connection(&self) -> (bool, Option<String>) {
            (true, None)
        }
    }

    #[tokio::test]
    async fn stops_at_primary_when_it_has_enough_and_fallback_disabled() {
        let primary = Arc::new(StaticIndexer {
            name: "MangaUpdates",
            tier: IndexerTier::Primary,
            results: vec![meta("One Piece", "mangaupdates", 1.0), meta("Naruto", "mangaupdates", 1.0)],
            calls: AtomicUsize::new(0),
        });
        let secondary = Arc::new(StaticIndexer {
            name: "MadaraDex",
            tier: IndexerTier::Secondary,
            results: vec![meta("Bleach", "madaradex", 0.8)],
            calls: AtomicUsize::new(0),
        });
        let dispatcher = TieredIndexer::new(vec![primary.clone(), secondary.clone()]);

        let results = dispatcher.search("x", 20, false, 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_through_every_tier_when_fallback_enabled() {
        let primary = Arc::new(StaticIndexer {
            name: "MangaUpdates",
            tier: IndexerTier::Primary,
            results: vec![meta("One Piece", "mangaupdates", 1.0)],
            calls: AtomicUsize::new(0),
        });
        let secondary = Arc::new(StaticIndexer {
            name: "MadaraDex",
            tier: IndexerTier::Secondary,
            results: vec![meta("Bleach", "madaradex", 0.8)],
            calls: AtomicUsize::new(0),
        });
        let dispatcher = TieredIndexer::new(vec![primary, secondary.clone()]);

        let results = dispatcher.search("x", 20, true, 5).await;
        assert_eq!(results.len(), 2);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dedup_keeps_higher_confidence_entry() {
        let primary = Arc::new(StaticIndexer {
            name: "MangaUpdates",
            tier: IndexerTier::Primary,
            results: vec![meta("One Piece!!", "mangaupdates", 0.5)],
            calls: AtomicUsize::new(0),
        });
        let secondary = Arc::new(StaticIndexer {
            name: "MadaraDex",
            tier: IndexerTier::Secondary,
            results: vec![meta("one piece", "madaradex", 0.9)],
            calls: AtomicUsize::new(0),
        });
        let dispatcher = TieredIndexer::new(vec![primary, secondary]);

        let results = dispatcher.search("one piece", 20, true, 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_indexer, "madaradex");
    }

    #[tokio::test]
    async fn cross_reference_keeps_high_similarity_candidates_only() {
        let primary = Arc::new(StaticIndexer {
            name: "MangaUpdates",
            tier: IndexerTier::Primary,
            results: vec![],
            calls: AtomicUsize::new(0),
        });
        let secondary = Arc::new(StaticIndexer {
            name: "MadaraDex",
            tier: IndexerTier::Secondary,
            results: vec![meta("One Piece", "madaradex", 0.8), meta("Completely Different", "madaradex", 0.8)],
            calls: AtomicUsize::new(0),
        });
        let dispatcher = TieredIndexer::new(vec![primary, secondary]);

        let target = meta("One Piece", "mangaupdates", 1.0);
        let refs = dispatcher.cross_reference(&target).await;
        assert!(refs.contains_key("mangaupdates"));
        assert!(refs.contains_key("madaradex"));
        assert_eq!(refs["madaradex"].title, "One Piece");
    }

    #[tokio::test]
    async fn primary_indexer_guard_caches_recent_searches() {
        let guard = PrimaryIndexerGuard::new();
        assert!(guard.cached_search("x", 20).await.is_none());
        guard.store_search("x", 20, vec![meta("Cached", "mangaupdates", 1.0)]).await;
        let hit = guard.cached_search("x", 20).await.unwrap();
        assert_eq!(hit[0].title, "Cached");
    }
}
