//! Connection-level TCP load balancer.
//!
//! Accepts client connections, picks the healthy backend with the fewest
//! ongoing sessions (round robin among ties, optional failover) and copies
//! bytes in both directions while counting load and traffic per backend.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ net::listener ──▶ load_balancer::scheduler ──▶ net::forward ──▶ Backend
//!                   │                      ▲
//!                   │                      │ HealthSnapshot
//!           lifecycle::activity     health::active ──▶ status mirrors
//! ```

// Core subsystems
pub mod config;
pub mod net;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::BalancerConfig;
pub use lifecycle::{Balancer, RunningBalancer, Shutdown};
