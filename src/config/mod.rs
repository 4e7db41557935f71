//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BalancerConfig (validated, immutable)
//!     → handed to lifecycle::Balancer at startup
//! ```
//!
//! # Design Decisions
//! - Config is loaded once and immutable for the process lifetime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BalancerConfig, HealthCheckConfig, ListenerConfig, ObservabilityConfig, ProbeKind,
    SchedulerConfig, TunnelConfig,
};
