use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::models::{Collapse, JoinKind};

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub runner: RunnerConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
    /// Name of the shared in-memory store used for CSV ingestion
    pub transient_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub jobs: usize,
    /// Per-item time limit handed to extractors, 0 = unbounded
    pub time_limit_secs: u64,
    /// Per-item memory limit handed to extractors, 0 = unbounded
    pub memory_limit_mb: u64,
    /// Batch-wide wait limit, 0 = use the time limit
    pub batch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub collapse: String,
    pub join_type: String,
    pub separator: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "benchdb.db".to_string(),
            max_connections: 4,
            connection_timeout_secs: 30,
            transient_name: "in_memory".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file_path: None, format: "text".to_string() }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { jobs: 1, time_limit_secs: 0, memory_limit_mb: 0, batch_timeout_secs: 0 }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { collapse: "group_concat".to_string(), join_type: "left".to_string(), separator: ",".to_string() }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&Self::default())?)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("benchdb").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("BENCHDB").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(anyhow::anyhow!("database path cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.connection_timeout_secs == 0 {
            return Err(anyhow::anyhow!("connection_timeout_secs must be greater than 0"));
        }
        if self.database.transient_name.trim().is_empty() {
            return Err(anyhow::anyhow!("transient_name cannot be empty"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if self.runner.jobs == 0 {
            return Err(anyhow::anyhow!("jobs must be greater than 0"));
        }

        if self.query.separator.chars().count() != 1 {
            return Err(anyhow::anyhow!("separator must be a single character"));
        }

        self.collapse()?;
        self.join_kind()?;

        Ok(())
    }

    /// Default collapse function for resolved features
    pub fn collapse(&self) -> Result<Collapse> {
        Ok(self.query.collapse.parse()?)
    }

    /// Default join for same-context feature tables
    pub fn join_kind(&self) -> Result<JoinKind> {
        Ok(self.query.join_type.parse()?)
    }

    /// CSV field separator as a byte
    #[must_use]
    pub fn separator(&self) -> u8 {
        self.query.separator.bytes().next().unwrap_or(b',')
    }

    /// Get log level from environment or config
    #[must_use]
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.database.path, "benchdb.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.runner.jobs, 1);
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
