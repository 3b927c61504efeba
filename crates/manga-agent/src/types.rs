//! Shared data model for agents (spec §3): descriptors, capabilities,
//! status, metrics, and the normalized domain types that flow out of a
//! [`crate::Provider`].

use std::collections::HashMap;
use std::time::Duration;

/// Operations a [`crate::Provider`]/[`crate::Agent`] may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentCapability {
    Search,
    MangaDetails,
    Chapters,
    Pages,
    DownloadPage,
    DownloadCover,
    HealthCheck,
}

/// Immutable identity and policy for an agent, created at startup from
/// configuration (spec §3 `AgentDescriptor`).
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    /// Unique key, compared case-insensitively.
    pub name: String,
    pub base_url: String,
    pub supports_nsfw: bool,
    pub requires_flaresolverr: bool,
    /// Lower is higher priority.
    pub priority: i32,
    pub capabilities: Vec<AgentCapability>,
}

impl AgentDescriptor {
    /// Lower-cased key used by the registry (spec: "unique key, case-insensitive").
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn has_capability(&self, cap: AgentCapability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// Mutable runtime status of an agent (spec §3 `AgentState.status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Active,
    Inactive,
    Error,
    CircuitOpen,
}

impl AgentStatus {
    /// `true` for Active and Inactive: "not currently serving" is not the
    /// same as "failed" (spec §4.3).
    pub fn is_healthy(&self) -> bool {
        matches!(self, AgentStatus::Active | AgentStatus::Inactive)
    }
}

/// Rolling metrics recorded by an agent (spec §3 `AgentState.metrics`).
#[derive(Debug, Clone, Default)]
pub struct AgentMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub throttled_calls: u64,
    pub avg_response_time: Duration,
    pub last_error: Option<String>,
    pub circuit_open_count: u64,
}

impl AgentMetrics {
    /// Success rate in `[0, 100]`; `0` before any calls complete.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        (self.successful_calls as f64 / self.total_calls as f64) * 100.0
    }

    pub(crate) fn record_success(&mut self, elapsed: Duration) {
        self.total_calls += 1;
        self.successful_calls += 1;
        self.update_avg(elapsed);
    }

    pub(crate) fn record_failure(&mut self, elapsed: Duration, error: impl Into<String>) {
        self.total_calls += 1;
        self.failed_calls += 1;
        self.last_error = Some(error.into());
        self.update_avg(elapsed);
    }

    pub(crate) fn record_throttle(&mut self) {
        self.throttled_calls += 1;
    }

    fn update_avg(&mut self, elapsed: Duration) {
        // Simple rolling average over completed (non-throttled) calls.
        let completed = self.successful_calls + self.failed_calls;
        if completed <= 1 {
            self.avg_response_time = elapsed;
        } else {
            let prev_total = self.avg_response_time.as_secs_f64() * (completed - 1) as f64;
            let new_avg = (prev_total + elapsed.as_secs_f64()) / completed as f64;
            self.avg_response_time = Duration::from_secs_f64(new_avg);
        }
    }
}

/// A normalized search hit, common across all providers (spec §3 `SearchResult`).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchResult {
    /// Provider-external id.
    pub id: String,
    pub title: String,
    pub cover_url: Option<String>,
    pub description: Option<String>,
    pub provider: String,
    pub url: String,
    #[serde(default)]
    pub in_library: bool,
    #[serde(default)]
    pub is_nsfw: bool,
}

/// Manga details blob returned by a provider. Kept as an opaque map per
/// spec §9 ("dynamic JSON metadata blobs... carry as an opaque key-value
/// map"), since provider-specific field sets vary too widely to model
/// centrally.
pub type MangaDetails = HashMap<String, serde_json::Value>;

/// A single chapter entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Chapter {
    pub id: String,
    pub number: String,
    pub title: Option<String>,
    pub url: String,
}

/// Result of a paginated search/chapters call.
#[derive(Debug, Clone)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub has_more: bool,
}

/// Outcome of [`crate::Provider::health_check`].
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub ok: bool,
    pub response_time: Duration,
    pub error: Option<String>,
}

