use crate::uploader::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Agent configuration stored as JSON, merged with CLI flags at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the Depot instance
    pub api_url: String,
    /// API token; the DEPOT_API_TOKEN environment variable wins over this
    pub api_token: String,
    /// Upload worker count; 0 picks a default from the CPU count
    pub workers: usize,
    /// Chunk slots in the dispatch queue
    pub queue_capacity: usize,
    /// Bytes per part before compression
    pub chunk_size: u64,
    /// Upload attempts per chunk
    pub tries: u32,
    /// Attempts per control-plane RPC
    pub rpc_tries: u32,
    /// Base backoff delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub retry_max_delay_ms: u64,
    /// Per-request timeout for part uploads, in seconds
    pub request_timeout_secs: u64,
    /// Seconds between close-state polls
    pub close_poll_interval_secs: u64,
    /// Give up polling for `closed` after this many seconds
    pub close_poll_timeout_secs: u64,
    /// Seconds between throughput reports
    pub throughput_report_secs: u64,
    /// Whether to write logs to file
    pub log_to_file: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: LogLevel,
    /// Maximum number of log files to keep
    pub log_max_files: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            api_token: String::new(),
            workers: 0,
            queue_capacity: 64,
            chunk_size: 16 * 1024 * 1024,
            tries: 3,
            rpc_tries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            request_timeout_secs: 600,
            close_poll_interval_secs: 2,
            close_poll_timeout_secs: 300,
            throughput_report_secs: 5,
            log_to_file: true,
            log_level: LogLevel::Info,
            log_max_files: 5,
        }
    }
}

impl AppConfig {
    /// Default config file location (~/.depot/config.json)
    pub fn default_path() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to get user home directory")?;
        Ok(home_dir.join(".depot").join("config.json"))
    }

    /// Load configuration from the given path, using defaults for missing
    /// fields. A missing file is not an error.
    pub fn load(path: &PathBuf) -> Result<AppConfig> {
        if !path.exists() {
            tracing::info!(target: "config", path = %path.display(), "Config file not found, using defaults");
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;

        // serde's #[serde(default)] handles missing fields automatically
        let config: AppConfig =
            serde_json::from_str(&content).context("Failed to parse config file")?;

        tracing::info!(target: "config", path = %path.display(), "Loaded configuration from file");

        Ok(config)
    }

    /// Backoff settings shared by control-plane RPCs and chunk re-enqueues.
    pub fn rpc_policy(&self) -> RetryPolicy {
        RetryPolicy {
            tries: self.rpc_tries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Get the log directory path
    pub fn log_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".depot")
            .join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.tries, 3);
        assert_eq!(config.chunk_size, 16 * 1024 * 1024);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_load_with_missing_fields() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{{}}").unwrap();

        let config = AppConfig::load(&temp_file.path().to_path_buf()).unwrap();
        assert_eq!(config.tries, 3); // Should use default
    }

    #[test]
    fn test_load_with_overrides() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"{{"tries": 7, "chunk_size": 5242880, "log_level": "debug"}}"#
        )
        .unwrap();

        let config = AppConfig::load(&temp_file.path().to_path_buf()).unwrap();
        assert_eq!(config.tries, 7);
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let path = PathBuf::from("/nonexistent/path/config.json");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.queue_capacity, 64); // Should use default
    }

    #[test]
    fn rpc_policy_never_allows_zero_tries() {
        let config = AppConfig {
            rpc_tries: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.rpc_policy().tries, 1);
    }
}
