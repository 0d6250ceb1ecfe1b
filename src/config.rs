//! Configuration management for the trade executor
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every retry bound and delay the engine uses lives here.

use crate::execution::SpacingPolicy;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static::lazy_static! {
    static ref ENV_VAR_PATTERN: regex::Regex =
        regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub executor: ExecutorConfig,
    pub plan: PlanConfig,
    pub plan_service: PlanServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound for a single confirmation wait
    pub confirmation_timeout_ms: u64,
    /// Which steps wait for confirmation in `execute_steps`
    pub spacing: SpacingPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: 300_000,
            spacing: SpacingPolicy::Dependents,
        }
    }
}

impl ExecutorConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Create/refresh attempts, no delay between them
    pub creation_attempts: u32,
    pub proof_submission_attempts: u32,
    pub proof_submission_delay_ms: u64,
    /// Settle time after switching chains, before submitting
    pub chain_switch_delay_ms: u64,
    pub l1_poll_interval_ms: u64,
    pub l2_poll_interval_ms: u64,
    /// Added to a step's expected settlement time to bound polling
    pub poll_grace_ms: u64,
    /// Flow label used in displayable errors
    pub flow: String,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            creation_attempts: 3,
            proof_submission_attempts: 3,
            proof_submission_delay_ms: 1_000,
            chain_switch_delay_ms: 500,
            l1_poll_interval_ms: 2_000,
            l2_poll_interval_ms: 1_000,
            poll_grace_ms: 30_000,
            flow: "swap".to_string(),
        }
    }
}

impl PlanConfig {
    pub fn proof_submission_delay(&self) -> Duration {
        Duration::from_millis(self.proof_submission_delay_ms)
    }

    pub fn chain_switch_delay(&self) -> Duration {
        Duration::from_millis(self.chain_switch_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanServiceConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub api_key: Option<String>,
}

impl Default for PlanServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            request_timeout_ms: 10_000,
            api_key: None,
        }
    }
}

impl Settings {
    /// Load settings from `$TRADE_EXECUTOR_CONFIG` or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TRADE_EXECUTOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text
    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.plan.creation_attempts == 0 {
            anyhow::bail!("plan.creation_attempts must be at least 1");
        }
        if self.plan.proof_submission_attempts == 0 {
            anyhow::bail!("plan.proof_submission_attempts must be at least 1");
        }
        if self.plan.l1_poll_interval_ms == 0 || self.plan.l2_poll_interval_ms == 0 {
            anyhow::bail!("Poll intervals must be non-zero");
        }
        if self.executor.confirmation_timeout_ms == 0 {
            anyhow::bail!("executor.confirmation_timeout_ms must be non-zero");
        }
        if self.plan_service.base_url.is_empty() {
            tracing::warn!("plan_service.base_url is empty - remote plans unavailable");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
