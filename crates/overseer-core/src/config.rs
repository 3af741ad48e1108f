use crate::{OverseerError, OverseerResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tunables consumed by the orchestrator as plain values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverseerConfig {
    /// Retries allowed before a failing task escalates.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff (`base * 2^attempt`).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound (inclusive) of the random jitter added to each delay.
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,
    /// Period of the agent health sweep.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Cumulative API spend (dollars) that raises an advisory checkpoint.
    #[serde(default = "default_cost_alert_threshold")]
    pub cost_alert_threshold: f64,
    /// Directory holding `audit.jsonl`.
    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_jitter_ms() -> u64 {
    500
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_cost_alert_threshold() -> f64 {
    10.0
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("./data/audit")
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
            cost_alert_threshold: default_cost_alert_threshold(),
            audit_dir: default_audit_dir(),
        }
    }
}

impl OverseerConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> OverseerResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| OverseerError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot work with.
    pub fn validate(&self) -> OverseerResult<()> {
        if !self.cost_alert_threshold.is_finite() || self.cost_alert_threshold <= 0.0 {
            return Err(OverseerError::Config(format!(
                "cost_alert_threshold must be positive, got {}",
                self.cost_alert_threshold
            )));
        }
        if self.health_check_interval_secs == 0 {
            return Err(OverseerError::Config(
                "health_check_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
