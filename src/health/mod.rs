//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → probe.rs (TCP connect or HTTP status, per backend task)
//!     → HealthSnapshot
//!     → state.rs StatusPublisher
//!         → Scheduler (awaited)
//!         → Status mirrors (try_send, may drop)
//! ```
//!
//! # Design Decisions
//! - The monitor shares nothing with the scheduler except the snapshot channel
//! - A snapshot is authoritative: it is the only way back from Down to Up
//! - Probe failures of any kind mean Down; they are never fatal

pub mod active;
pub mod probe;
pub mod state;

pub use active::HealthMonitor;
pub use probe::{HealthProbe, HttpStatusProbe, ProbeError, TcpConnectProbe};
pub use state::{HealthSnapshot, HealthState, StatusPublisher};
