use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::config::{EngineConfig, EventServiceConfig, EventStoreConfig};
use crate::infrastructure::logging::LogConfig;

/// Top-level configuration aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub event_store: EventStoreConfig,
    #[serde(default)]
    pub event_service: EventServiceConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_tasks: {0}. Must be between 1 and 256")]
    InvalidWorkerCount(usize),

    #[error("Invalid poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),

    #[error("Invalid default_timeout_secs: {0}. Must be positive")]
    InvalidTimeout(u64),

    #[error("Invalid max_events: {0}. Must be at least 1")]
    InvalidMaxEvents(usize),

    #[error("Invalid retention_hours: {0}. Must be positive")]
    InvalidRetention(i64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .taskforge/config.yaml (project config)
    /// 3. .taskforge/local.yaml (local overrides, optional)
    /// 4. Environment variables (TASKFORGE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".taskforge/config.yaml"))
            .merge(Yaml::file(".taskforge/local.yaml"))
            .merge(Env::prefixed("TASKFORGE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let workers = config.engine.max_concurrent_tasks;
        if workers == 0 || workers > 256 {
            return Err(ConfigError::InvalidWorkerCount(workers));
        }
        if config.engine.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(
                config.engine.poll_interval_ms,
            ));
        }
        if config.engine.default_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(
                config.engine.default_timeout_secs,
            ));
        }
        if config.event_store.max_events == 0 {
            return Err(ConfigError::InvalidMaxEvents(config.event_store.max_events));
        }
        if config.event_store.retention_hours <= 0 {
            return Err(ConfigError::InvalidRetention(
                config.event_store.retention_hours,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}
