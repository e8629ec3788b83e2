use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How log files roll over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Stdout log rendering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Logging setup consumed by [`Logger::init`](super::Logger::init).
///
/// File output is optional; when `log_dir` is unset everything goes to
/// stdout only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level directive (trace, debug, info, warn, error);
    /// `RUST_LOG` still overrides per-target
    #[serde(default = "default_level")]
    pub level: String,

    /// Stdout rendering; file output is always JSON
    #[serde(default = "default_format")]
    pub format: LogFormat,

    /// Directory for rolling log files; `None` disables file output
    pub log_dir: Option<PathBuf>,

    /// Name of the rolling log file inside `log_dir`
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Also log to stdout when file output is configured
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            log_dir: None,
            file_name: default_file_name(),
            enable_stdout: true,
            rotation: RotationPolicy::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> LogFormat {
    LogFormat::Json
}

fn default_file_name() -> String {
    "taskforge.log".to_string()
}

fn default_true() -> bool {
    true
}
