//! The external Provider interface each upstream site adapter implements
//! (spec §6). Provider-specific error kinds are flattened to a plain
//! string message; the [`crate::Agent`] decides policy around retries,
//! circuits, and quarantine.

use crate::types::{Chapter, HealthCheckResult, MangaDetails, PagedResult, SearchResult};
use async_trait::async_trait;
use std::time::Duration;

/// Error returned by a provider call. Carries only a message: the agent
/// layer is the one that categorizes failures (spec §6: "flattened to
/// normal exceptions").
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl From<&str> for ProviderError {
    fn from(s: &str) -> Self {
        ProviderError(s.to_string())
    }
}

impl From<String> for ProviderError {
    fn from(s: String) -> Self {
        ProviderError(s)
    }
}

/// A site-specific upstream adapter.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        page: u32,
        limit: u32,
    ) -> Result<PagedResult<SearchResult>, ProviderError>;

    async fn get_manga_details(&self, id: &str) -> Result<MangaDetails, ProviderError>;

    async fn get_chapters(
        &self,
        id: &str,
        page: u32,
        limit: u32,
    ) -> Result<PagedResult<Chapter>, ProviderError>;

    async fn get_pages(&self, manga_id: &str, chapter_id: &str) -> Result<Vec<String>, ProviderError>;

    async fn download_page(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, ProviderError>;

    async fn download_cover(&self, manga_id: &str) -> Result<Vec<u8>, ProviderError>;

    async fn health_check(&self, timeout: Duration) -> Result<HealthCheckResult, ProviderError>;
}
