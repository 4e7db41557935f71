//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on configured backends; also sizes the health status channels.
pub const MAX_BACKENDS: usize = 128;

/// Default cap on concurrently forwarded client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 8192;

/// Root configuration for the balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Ordered list of backend addresses (`host:port`).
    pub backends: Vec<String>,

    /// Listener configuration (listen addresses, connection limit).
    pub listener: ListenerConfig,

    /// Scheduling policy.
    pub scheduler: SchedulerConfig,

    /// Multiplexed tunnel settings.
    pub tunnel: TunnelConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen addresses, e.g. `tcp://127.0.0.1:3306` or `unix:///var/lib/mysql/mysql.sock`.
    pub listen: Vec<String>,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen: vec!["tcp://127.0.0.1:3306".to_string()],
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Retry other backends when a dial fails.
    pub failover: bool,

    /// Backend dial (or tunnel stream open) timeout in milliseconds.
    pub dial_timeout_ms: u64,

    /// Capacity of the pending request queue.
    pub request_queue: usize,
}

impl SchedulerConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failover: false,
            dial_timeout_ms: 1000,
            request_queue: 1024,
        }
    }
}

/// Tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Open per-request streams over a persistent tunnel when available.
    pub enabled: bool,

    /// Port of the tunnel endpoint on each backend host.
    pub port: u16,

    /// Timeout for establishing the tunnel and its initial ping, in milliseconds.
    pub ping_timeout_ms: u64,
}

impl TunnelConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 6900,
            ping_timeout_ms: 1000,
        }
    }
}

/// Kind of out-of-band health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Plain TCP connect to the backend address. Liveness only.
    Tcp,
    /// HTTP status endpoint on the backend host; checks cluster membership.
    #[default]
    Http,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the health monitor.
    pub enabled: bool,

    /// Probe cycle length in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,

    /// Probe implementation.
    pub probe: ProbeKind,

    /// Port of the HTTP status endpoint (http probe only).
    pub status_port: u16,

    /// Path of the HTTP status endpoint (http probe only).
    pub path: String,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            timeout_secs: 5,
            probe: ProbeKind::Http,
            status_port: 9200,
            path: "/".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
