//! Configuration data structures

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on a single inter-probe delay, in milliseconds
pub const MAX_POLL_DELAY_MS: u64 = 600_000;

/// Logging level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Parameters for the confirmation poller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollConfig {
    /// Maximum number of probes before giving up (>= 1)
    pub max_poll_attempts: u32,
    /// Base delay between probes in milliseconds
    pub poll_interval_ms: u64,
    /// Per-probe delay multiplier (>= 1.0); constant delay when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_poll_attempts: 12,
            poll_interval_ms: 5000,
            backoff_multiplier: None,
        }
    }
}

impl PollConfig {
    /// Constant-interval policy
    pub fn constant(max_poll_attempts: u32, poll_interval_ms: u64) -> Self {
        Self {
            max_poll_attempts,
            poll_interval_ms,
            backoff_multiplier: None,
        }
    }

    /// Exponential backoff policy
    pub fn with_backoff(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    /// Delay to wait after `completed_probes` empty probes, before the next one.
    ///
    /// `completed_probes` starts at 1: the wait after the first empty probe is
    /// always the base interval. With a multiplier the delay grows as
    /// `interval * multiplier^(completed_probes - 1)`, capped at
    /// [`MAX_POLL_DELAY_MS`].
    pub fn delay_after(&self, completed_probes: u32) -> Duration {
        let delay_ms = match self.backoff_multiplier {
            Some(multiplier) if multiplier > 1.0 => {
                let exponent = completed_probes.saturating_sub(1) as i32;
                let delay = self.poll_interval_ms as f64 * multiplier.powi(exponent);
                delay.min(MAX_POLL_DELAY_MS as f64) as u64
            }
            _ => self.poll_interval_ms.min(MAX_POLL_DELAY_MS),
        };

        Duration::from_millis(delay_ms)
    }

    /// Validate poll parameters, appending violations to `errors`
    fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.max_poll_attempts == 0 {
            errors.push("poll.max_poll_attempts must be at least 1".to_string());
        }
        if let Some(multiplier) = self.backoff_multiplier {
            if multiplier.is_nan() || multiplier < 1.0 {
                errors.push("poll.backoff_multiplier must be at least 1.0".to_string());
            }
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Logging verbosity level
    #[serde(default)]
    pub log_level: LogLevel,
    /// Number of successful attempts at which launching stops
    pub target_successes: u32,
    /// Maximum simultaneously running attempts
    pub concurrency_limit: u32,
    /// Attempt budget; derived from target and concurrency when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Progress is reported every `batch_size` resolved attempts
    pub batch_size: u32,
    /// Domains identities are generated under
    pub domains: Vec<String>,
    /// Append-only `identity:secret` log
    pub result_file: PathBuf,
    /// JSON store of finished run summaries
    pub history_file: PathBuf,
    /// Confirmation poller parameters
    #[serde(default)]
    pub poll: PollConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskloop");

        Self {
            log_level: LogLevel::Info,
            target_successes: 1,
            concurrency_limit: 5,
            max_attempts: None,
            batch_size: 10,
            domains: vec!["example.com".to_string()],
            result_file: data_dir.join("results.txt"),
            history_file: data_dir.join("history.json"),
            poll: PollConfig::default(),
        }
    }
}

impl Configuration {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Configuration =
                toml::from_str(&content).context("Failed to parse config TOML")?;
            Ok(config)
        } else {
            // Return default configuration if file doesn't exist
            Ok(Configuration::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("taskloop").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.target_successes == 0 {
            errors.push("target_successes must be at least 1".to_string());
        }

        if self.concurrency_limit == 0 {
            errors.push("concurrency_limit must be at least 1".to_string());
        }

        if let Some(max_attempts) = self.max_attempts {
            if max_attempts < self.target_successes {
                errors.push("max_attempts cannot be lower than target_successes".to_string());
            }
        }

        if self.batch_size == 0 {
            errors.push("batch_size must be at least 1".to_string());
        }

        if self.domains.iter().all(|d| d.trim().is_empty()) {
            errors.push("domains must contain at least one domain".to_string());
        }

        self.poll.collect_errors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
