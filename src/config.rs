//! Engine Configuration
//!
//! Loaded from environment variables at process startup, following the
//! `dotenvy` + `std::env::var` pattern the surrounding workspace uses for
//! its worker and web-server binaries.

use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;

fn default_max_concurrent_leads() -> u32 {
    100
}

fn default_lead_stagger_ms() -> u64 {
    30_000
}

/// Process-wide engine configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Per-campaign daily connection-request limit (`REQUESTS_PER_DAY`).
    pub requests_per_day: u32,
    /// Per-campaign weekly connection-request limit (`REQUESTS_PER_WEEK`).
    pub requests_per_week: u32,
    /// Base URL of the provider aggregator API.
    pub provider_base_url: String,
    /// Bearer token for the provider aggregator API.
    #[serde(default)]
    pub provider_token: Option<String>,
    /// Postgres connection string, required only when the `database`
    /// feature is enabled.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Upper bound on concurrently-running lead workflows per campaign.
    #[serde(default = "default_max_concurrent_leads")]
    pub max_concurrent_leads: u32,
    /// Delay between successive lead spawns, in milliseconds.
    #[serde(default = "default_lead_stagger_ms")]
    pub lead_stagger_ms: u64,
}

impl EngineConfig {
    /// Load configuration from the process environment. Calls
    /// `dotenvy::dotenv()` first so a local `.env` file, if present, is
    /// merged in without overriding already-set variables.
    pub fn from_env() -> Result<Self, EngineError> {
        dotenvy::dotenv().ok();

        let requests_per_day = env_parse("REQUESTS_PER_DAY", 100)?;
        let requests_per_week = env_parse("REQUESTS_PER_WEEK", 500)?;
        let provider_base_url = std::env::var("PROVIDER_BASE_URL")
            .unwrap_or_else(|_| "https://api.provider.example".to_string());
        let provider_token = std::env::var("PROVIDER_TOKEN").ok();
        let database_url = std::env::var("DATABASE_URL").ok();
        let max_concurrent_leads = env_parse("MAX_CONCURRENT_LEADS", default_max_concurrent_leads())?;
        let lead_stagger_ms = env_parse("LEAD_STAGGER_MS", default_lead_stagger_ms())?;

        Ok(Self {
            requests_per_day,
            requests_per_week,
            provider_base_url,
            provider_token,
            database_url,
            max_concurrent_leads,
            lead_stagger_ms,
        })
    }

    /// Load configuration from a YAML file, for tests and non-interactive
    /// deployments that prefer a checked-in config over raw env vars.
    /// Mirrors the teacher's `WorkflowLoader::load_from_file`.
    pub fn load_from_file(path: &Path) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(e.to_string()))?;
        Self::load_from_str(&content)
    }

    /// Load configuration from a YAML string.
    pub fn load_from_str(yaml: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(yaml).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn lead_stagger(&self) -> Duration {
        Duration::from_millis(self.lead_stagger_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, EngineError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| EngineError::Config(format!("invalid value for {key}: {v}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_str_fills_defaults() {
        let yaml = r#"
requests_per_day: 40
requests_per_week: 200
provider_base_url: "https://api.example.com"
"#;
        let cfg = EngineConfig::load_from_str(yaml).unwrap();
        assert_eq!(cfg.requests_per_day, 40);
        assert_eq!(cfg.max_concurrent_leads, 100);
        assert_eq!(cfg.lead_stagger_ms, 30_000);
    }
}
