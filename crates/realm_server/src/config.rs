//! Configuration management for the realm server.
//!
//! Settings are loaded from a TOML file, overridden from the command line,
//! validated, then converted into the types the library crates expect.

use crate::cli::CliArgs;
use realm_player_data::PlayerDataConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Failed to render default config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Server identity and shutdown behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Name used in startup and shutdown logs
    pub name: String,
    /// Upper bound on how long a graceful shutdown may take
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "realm".to_string(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Where player documents live and how many store handles are pooled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    pub data_dir: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    4
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/players"),
            pool_size: default_pool_size(),
        }
    }
}

/// Off-thread persistence tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    pub max_concurrent_io: usize,
    pub slow_operation_warn_ms: u64,
    pub save_retry_attempts: u32,
    pub save_retry_backoff_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_io: 4,
            slow_operation_warn_ms: 250,
            save_retry_attempts: 3,
            save_retry_backoff_ms: 100,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(data_dir) = &args.data_dir {
            self.persistence.data_dir = data_dir.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.name.trim().is_empty() {
            return Err("Server name cannot be empty".to_string());
        }
        if self.persistence.data_dir.as_os_str().is_empty() {
            return Err("Persistence data_dir cannot be empty".to_string());
        }
        if self.persistence.pool_size == 0 {
            return Err("Persistence pool_size must be at least 1".to_string());
        }
        if self.executor.max_concurrent_io == 0 {
            return Err("Executor max_concurrent_io must be at least 1".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    pub fn to_player_data_config(&self) -> PlayerDataConfig {
        PlayerDataConfig {
            max_concurrent_io: self.executor.max_concurrent_io,
            slow_operation_warn: Duration::from_millis(self.executor.slow_operation_warn_ms),
            save_retry_attempts: self.executor.save_retry_attempts,
            save_retry_backoff: Duration::from_millis(self.executor.save_retry_backoff_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}
