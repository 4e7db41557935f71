//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP / Unix connection
//!     → listener.rs (accept loop, connection limit, activity gate)
//!     → Scheduler (backend selection, dial)
//!     → forward.rs (bidirectional copy, byte accounting)
//!
//! connection.rs tracks every session from dial to close so shutdown can
//! wait for them to drain.
//! ```
//!
//! # Design Decisions
//! - Bounded accept via semaphore permits prevents resource exhaustion
//! - Streams are type-erased (stream.rs); nothing past the listener cares
//!   whether a socket is TCP, Unix or a tunnel stream

pub mod connection;
pub mod forward;
pub mod listener;
pub mod stream;
