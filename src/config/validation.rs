//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate backend addresses and listen URLs
//! - Validate value ranges (timeouts > 0, limits > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{BalancerConfig, MAX_BACKENDS};
use crate::net::listener::ListenAddr;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,

    #[error("{count} backends configured, at most {max} supported")]
    TooManyBackends { count: usize, max: usize },

    #[error("invalid backend address {0:?}, expected host:port")]
    InvalidBackend(String),

    #[error("backend {0} listed more than once")]
    DuplicateBackend(String),

    #[error("no listen addresses configured")]
    NoListeners,

    #[error("invalid listen address {0:?}")]
    InvalidListen(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid metrics address {0:?}")]
    InvalidMetricsAddress(String),
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    if config.backends.len() > MAX_BACKENDS {
        errors.push(ValidationError::TooManyBackends {
            count: config.backends.len(),
            max: MAX_BACKENDS,
        });
    }

    let mut seen = HashSet::new();
    for address in &config.backends {
        if !is_host_port(address) {
            errors.push(ValidationError::InvalidBackend(address.clone()));
        } else if !seen.insert(address.as_str()) {
            errors.push(ValidationError::DuplicateBackend(address.clone()));
        }
    }

    if config.listener.listen.is_empty() {
        errors.push(ValidationError::NoListeners);
    }
    for listen in &config.listener.listen {
        if listen.parse::<ListenAddr>().is_err() {
            errors.push(ValidationError::InvalidListen(listen.clone()));
        }
    }

    let ranges = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("scheduler.dial_timeout_ms", config.scheduler.dial_timeout_ms),
        ("scheduler.request_queue", config.scheduler.request_queue as u64),
        ("health_check.interval_secs", config.health_check.interval_secs),
        ("health_check.timeout_secs", config.health_check.timeout_secs),
    ];
    for (name, value) in ranges {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }
    if config.tunnel.enabled && config.tunnel.port == 0 {
        errors.push(ValidationError::Zero("tunnel.port"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` with a non-empty host and a non-zero port.
fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && matches!(port.parse::<u16>(), Ok(p) if p != 0)
        }
        None => false,
    }
}
