//! Runtime configuration models with serde defaults.

use serde::{Deserialize, Serialize};

use super::event::RetryConfig;

/// Execution engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent workers
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Worker poll interval when the queue is empty, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout applied to tasks that do not carry their own, in seconds
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Cap on the exponential retry backoff, in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_secs: default_timeout_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

/// Event store bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStoreConfig {
    /// Maximum number of retained events
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Retention window, in hours
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// Event dispatch tuning.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventServiceConfig {
    /// Retry policy applied per handler
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_backoff_secs() -> u64 {
    30
}

fn default_max_events() -> usize {
    10_000
}

fn default_retention_hours() -> i64 {
    24
}
