//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Bind listeners → Build registry
//!     → Spawn scheduler, health monitor, acceptors
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Acceptors close sockets → Monitor aborts probes
//!     → Scheduler refuses queued requests → Sessions drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second signal  → Forced exit (binary)
//!
//! Activity (activity.rs):
//!     Leader election → ActivitySwitch → ActivityGate → acceptors
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listeners, then tasks
//! - Shutdown is a single broadcast every task subscribes to
//! - The join barrier covers spawned tasks and live sessions

pub mod activity;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use activity::{ActivityGate, ActivitySwitch};
pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
pub use startup::{Balancer, RunningBalancer, StartupError};
