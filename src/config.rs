use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::engine::OrchestratorConfig;

/// Runtime settings. Unset fields fall back to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// In-memory storage when unset.
    pub database_url: Option<String>,
    pub prediction_url: Option<String>,
    pub port: u16,
    pub sim_interval_secs: u64,
    pub auto_reassign_critical: bool,
    pub log_level: String,
    pub prediction_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            prediction_url: None,
            port: 8080,
            sim_interval_secs: 5,
            auto_reassign_critical: false,
            log_level: "info".to_string(),
            prediction_timeout_secs: 10,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} must be a boolean, got '{}'", key, other),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} has an invalid value '{}'", key, value))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads TOML, then lets environment variables override it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FAULTLINE_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database_url = Some(url);
        }
        if let Some(url) = lookup("FAULTLINE_PREDICTION_URL") {
            self.prediction_url = Some(url);
        }
        if let Some(port) = lookup("FAULTLINE_PORT") {
            self.port = parse_num("FAULTLINE_PORT", &port)?;
        }
        if let Some(secs) = lookup("FAULTLINE_SIM_INTERVAL_SECS") {
            self.sim_interval_secs = parse_num("FAULTLINE_SIM_INTERVAL_SECS", &secs)?;
        }
        if let Some(flag) = lookup("FAULTLINE_AUTO_REASSIGN_CRITICAL") {
            self.auto_reassign_critical = parse_bool("FAULTLINE_AUTO_REASSIGN_CRITICAL", &flag)?;
        }
        if let Some(level) = lookup("FAULTLINE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(secs) = lookup("FAULTLINE_PREDICTION_TIMEOUT_SECS") {
            self.prediction_timeout_secs = parse_num("FAULTLINE_PREDICTION_TIMEOUT_SECS", &secs)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sim_interval_secs == 0 {
            bail!("sim_interval_secs must be at least 1");
        }
        if self.prediction_timeout_secs == 0 {
            bail!("prediction_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn prediction_timeout(&self) -> Duration {
        Duration::from_secs(self.prediction_timeout_secs)
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            auto_reassign_critical: self.auto_reassign_critical,
        }
    }
}
