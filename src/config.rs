//! Configuration loading (spec §6): provider descriptor files and the
//! hot-swappable per-agent runtime config, plus the mapping from the
//! latter onto [`RateLimiterConfig`]/[`IsolationConfig`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use manga_isolation::IsolationConfig;
use manga_ratelimiter::RateLimiterConfig;
use serde::{Deserialize, Serialize};

/// Env var that, when set, enables loading `providers_cloudflare.json`
/// alongside the default provider set (spec §6).
pub const FLARESOLVERR_URL_ENV: &str = "FLARESOLVERR_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: String, #[source] source: serde_json::Error },
}

/// One entry of `providers_default.json` / `providers_cloudflare.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptorEntry {
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub url: String,
    #[serde(default)]
    pub supports_nsfw: bool,
    #[serde(default)]
    pub requires_flaresolverr: bool,
    #[serde(default)]
    pub use_flaresolverr: bool,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    999
}

/// Loads `providers_default.json`, and `providers_cloudflare.json` too if
/// `FLARESOLVERR_URL` is set, merging both lists.
pub fn load_provider_descriptors(config_dir: &Path) -> Result<Vec<ProviderDescriptorEntry>, ConfigError> {
    let mut entries = load_json_file::<Vec<ProviderDescriptorEntry>>(
        &config_dir.join("providers_default.json"),
    )?;

    if std::env::var(FLARESOLVERR_URL_ENV).is_ok() {
        let cloudflare_path = config_dir.join("providers_cloudflare.json");
        if cloudflare_path.exists() {
            entries.extend(load_json_file::<Vec<ProviderDescriptorEntry>>(&cloudflare_path)?);
        }
    }

    Ok(entries)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub threshold: u32,
    /// Cooldown, in whole seconds.
    pub timeout: u64,
    pub enabled: bool,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { threshold: 5, timeout: 300, enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingSettings {
    pub max_concurrent: usize,
    pub min_time_between_requests_ms: u64,
    pub enabled: bool,
}

impl Default for RateLimitingSettings {
    fn default() -> Self {
        Self { max_concurrent: 3, min_time_between_requests_ms: 1000, enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    pub health_check_enabled: bool,
    pub metrics_collection: bool,
    pub alert_on_failures: bool,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self { health_check_enabled: true, metrics_collection: true, alert_on_failures: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Request timeout, in whole seconds.
    pub request_timeout: u64,
    /// Health check timeout, in whole seconds.
    pub health_check_timeout: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self { request_timeout: 30, health_check_timeout: 30 }
    }
}

/// One agent's entry in `agent_runtime_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntimeEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub rate_limiting: RateLimitingSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl Default for AgentRuntimeEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 999,
            circuit_breaker: CircuitBreakerSettings::default(),
            rate_limiting: RateLimitingSettings::default(),
            monitoring: MonitoringSettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl AgentRuntimeEntry {
    /// Maps the `rate_limiting`/`circuit_breaker` sections onto a
    /// [`RateLimiterConfig`]. `circuit_breaker.enabled: false` is mapped to
    /// an effectively unreachable threshold, since the rate limiter itself
    /// has no on/off switch for its breaker.
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        let mut builder = RateLimiterConfig::builder()
            .max_concurrent(self.rate_limiting.max_concurrent)
            .min_spacing(Duration::from_millis(self.rate_limiting.min_time_between_requests_ms))
            .cb_cooldown(Duration::from_secs(self.circuit_breaker.timeout));

        builder = if self.circuit_breaker.enabled {
            builder.cb_threshold(self.circuit_breaker.threshold)
        } else {
            builder.cb_threshold(u32::MAX)
        };

        builder.build()
    }

    /// Maps `timeouts.request_timeout` onto an [`IsolationConfig`],
    /// keeping the isolation crate's other defaults.
    pub fn isolation_config(&self) -> IsolationConfig {
        IsolationConfig::builder()
            .request_timeout(Duration::from_secs(self.timeouts.request_timeout))
            .build()
    }
}

/// `agent_runtime_config.json`: agent name -> its hot-swappable settings.
pub type AgentRuntimeConfig = HashMap<String, AgentRuntimeEntry>;

/// Loads `agent_runtime_config.json`. Missing files are not an error: an
/// empty map means every agent falls back to [`AgentRuntimeEntry::default`].
pub fn load_agent_runtime_config(config_dir: &Path) -> Result<AgentRuntimeConfig, ConfigError> {
    let path = config_dir.join("agent_runtime_config.json");
    if !path.exists() {
        return Ok(AgentRuntimeConfig::new());
    }
    load_json_file(&path)
}

fn load_json_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_entry_defaults_match_spec_conservative_values() {
        let entry = AgentRuntimeEntry::default();
        assert!(entry.enabled);
        assert_eq!(entry.priority, 999);
        assert_eq!(entry.circuit_breaker.threshold, 5);
        assert_eq!(entry.rate_limiting.max_concurrent, 3);
        assert_eq!(entry.timeouts.request_timeout, 30);
    }

    #[test]
    fn rate_limiter_config_maps_spacing_and_breaker() {
        let entry = AgentRuntimeEntry {
            rate_limiting: RateLimitingSettings {
                max_concurrent: 4,
                min_time_between_requests_ms: 2500,
                enabled: true,
            },
            circuit_breaker: CircuitBreakerSettings { threshold: 8, timeout: 120, enabled: true },
            ..AgentRuntimeEntry::default()
        };
        let config = entry.rate_limiter_config();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.min_spacing, Duration::from_millis(2500));
        assert_eq!(config.cb_threshold, 8);
        assert_eq!(config.cb_cooldown, Duration::from_secs(120));
    }

    #[test]
    fn disabled_circuit_breaker_becomes_unreachable() {
        let mut entry = AgentRuntimeEntry::default();
        entry.circuit_breaker.enabled = false;
        assert_eq!(entry.rate_limiter_config().cb_threshold, u32::MAX);
    }

    #[test]
    fn isolation_config_maps_request_timeout() {
        let mut entry = AgentRuntimeEntry::default();
        entry.timeouts.request_timeout = 45;
        assert_eq!(entry.isolation_config().request_timeout, Duration::from_secs(45));
    }

    #[test]
    fn provider_descriptor_parses_a_minimal_entry() {
        let json = r#"[{
            "id": "mangadex",
            "name": "MangaDex",
            "class_name": "MangaDexProvider",
            "url": "https://api.mangadex.org"
        }]"#;
        let entries: Vec<ProviderDescriptorEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].enabled);
        assert_eq!(entries[0].priority, 999);
        assert!(!entries[0].supports_nsfw);
    }

    #[test]
    fn missing_runtime_config_file_yields_empty_map() {
        let dir = std::env::temp_dir().join(format!("manga-federated-core-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let config = load_agent_runtime_config(&dir).unwrap();
        assert!(config.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
