//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(
        "Validation failed: {}",
        .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    Validation(Vec<ValidationError>),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<BalancerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<BalancerConfig, ConfigError> {
    let config: BalancerConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProbeKind;

    #[test]
    fn parses_full_file() {
        let config = parse_config(
            r#"
            backends = ["10.0.0.1:3306", "10.0.0.2:3306", "10.0.0.3:3306"]

            [listener]
            listen = ["tcp://0.0.0.0:3306", "unix:///tmp/balancer.sock"]
            max_connections = 100

            [scheduler]
            failover = true
            dial_timeout_ms = 250

            [tunnel]
            enabled = true

            [health_check]
            interval_secs = 10
            probe = "http"
            status_port = 9200
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.listener.listen.len(), 2);
        assert_eq!(config.listener.max_connections, 100);
        assert!(config.scheduler.failover);
        assert_eq!(config.scheduler.dial_timeout().as_millis(), 250);
        assert_eq!(config.scheduler.request_queue, 1024);
        assert!(config.tunnel.enabled);
        assert_eq!(config.tunnel.port, 6900);
        assert_eq!(config.health_check.probe, ProbeKind::Http);
        assert_eq!(config.health_check.timeout_secs, 5);
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let config = parse_config(r#"backends = ["127.0.0.1:3307"]"#).unwrap();
        assert!(!config.scheduler.failover);
        assert_eq!(config.scheduler.dial_timeout_ms, 1000);
        assert_eq!(config.health_check.interval_secs, 60);
        assert_eq!(config.health_check.probe, ProbeKind::Http);
        assert_eq!(config.health_check.status_port, 9200);
        assert_eq!(config.listener.listen, vec!["tcp://127.0.0.1:3306".to_string()]);
    }

    #[test]
    fn validation_failures_surface() {
        let err = parse_config("backends = []").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("no backends configured"));
    }

    #[test]
    fn syntax_errors_surface() {
        let err = parse_config("backends = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
