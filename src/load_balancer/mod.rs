//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request (accepted connection)
//!     → scheduler.rs (actor, owns the registry)
//!     → registry.rs (Up backends only)
//!     → least_conn.rs (fewest ongoing, round robin on ties)
//!     → backend.rs (count the session, OngoingGuard)
//!     → connector.rs (direct dial or tunnel stream, bounded by timeout)
//!     → forward, or mark Down and fail over
//! ```
//!
//! # Design Decisions
//! - Health lives in the registry, load lives on the backend (atomics)
//! - Unhealthy backends are excluded from selection, with no fallback
//! - The connector is chosen once at startup and is invisible to selection

pub mod backend;
pub mod connector;
pub mod least_conn;
pub mod registry;
pub mod scheduler;

pub use backend::{Backend, OngoingGuard};
pub use connector::{Connector, Tunnel, TunnelDialer, TunnelSetup};
pub use registry::{BackendStatus, Registry};
pub use scheduler::{Request, ScheduleError, Scheduler, SchedulerHandle, SchedulerSettings, SessionOutcome, SessionSummary};
