//! Cross-provider search federation and tiered metadata indexing (spec
//! §4.10-4.11, components C10-C11).
//!
//! Grounded on `enhanced_tiered_search.py` and `tiered_indexing.py`.

mod indexer;
mod search;

pub use indexer::{Indexer, IndexerTier, PrimaryIndexerGuard, TieredIndexer, UniversalMetadata};
pub use search::{FederatedSearch, FederatedSearchRequest, FederatedSearchResponse, LibraryStatusLookup};
