//! Unit tests for config.rs module

use benchdb::config::{AppConfig, DatabaseConfig, RunnerConfig};
use benchdb::models::{Collapse, JoinKind};
use benchdb::runner::Runner;

#[test]
fn test_default_config_values() {
    let config = AppConfig::default();

    assert_eq!(config.database.path, "benchdb.db");
    assert_eq!(config.database.max_connections, 4);
    assert_eq!(config.database.connection_timeout_secs, 30);
    assert_eq!(config.database.transient_name, "in_memory");
}

#[test]
fn test_default_logging_config() {
    let config = AppConfig::default();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.file_path, None);
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_default_runner_config() {
    let config = AppConfig::default();

    assert_eq!(config.runner.jobs, 1);
    assert_eq!(config.runner.time_limit_secs, 0);
    assert_eq!(config.runner.memory_limit_mb, 0);
    assert_eq!(config.runner.batch_timeout_secs, 0);
}

#[test]
fn test_default_query_config() {
    let config = AppConfig::default();

    assert_eq!(config.collapse().unwrap(), Collapse::GroupConcat);
    assert_eq!(config.join_kind().unwrap(), JoinKind::Left);
    assert_eq!(config.separator(), b',');
}

#[test]
fn test_config_validation_success() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_zero_max_connections() {
    let mut config = AppConfig::default();
    config.database.max_connections = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_zero_connection_timeout() {
    let mut config = AppConfig::default();
    config.database.connection_timeout_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_empty_path() {
    let mut config = AppConfig::default();
    config.database.path = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_invalid_log_level() {
    let mut config = AppConfig::default();
    config.logging.level = "invalid".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_valid_log_levels() {
    for level in ["trace", "debug", "info", "warn", "error"] {
        let mut config = AppConfig::default();
        config.logging.level = level.to_string();
        assert!(config.validate().is_ok(), "Failed for level: {level}");
    }
}

#[test]
fn test_config_validation_invalid_log_format() {
    let mut config = AppConfig::default();
    config.logging.format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_zero_jobs() {
    let mut config = AppConfig::default();
    config.runner.jobs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_unknown_collapse() {
    let mut config = AppConfig::default();
    config.query.collapse = "avg".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_unknown_join() {
    let mut config = AppConfig::default();
    config.query.join_type = "outer".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_multi_char_separator() {
    let mut config = AppConfig::default();
    config.query.separator = ";;".to_string();
    assert!(config.validate().is_err());

    config.query.separator = ";".to_string();
    assert!(config.validate().is_ok());
    assert_eq!(config.separator(), b';');
}

#[test]
fn test_runner_from_config() {
    let config = RunnerConfig { jobs: 4, time_limit_secs: 10, memory_limit_mb: 512, batch_timeout_secs: 0 };
    assert_eq!(Runner::from_config(&config).jobs(), 4);
}

#[test]
fn test_database_config_clone() {
    let config = DatabaseConfig {
        path: "test.db".to_string(),
        max_connections: 2,
        connection_timeout_secs: 15,
        transient_name: "scratch".to_string(),
    };
    let cloned = config.clone();
    assert_eq!(config.path, cloned.path);
    assert_eq!(config.transient_name, cloned.transient_name);
}

#[test]
fn test_config_serialization_roundtrip() {
    let config = AppConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let parsed: AppConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.database.path, config.database.path);
    assert_eq!(parsed.query.separator, config.query.separator);
}
