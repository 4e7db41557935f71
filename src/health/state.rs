//! Backend health state and snapshot distribution.
//!
//! # States
//! - Up: backend receives traffic
//! - Down: backend excluded from selection
//!
//! # Writers
//! ```text
//! Health monitor snapshot → Up | Down   (authoritative, every cycle)
//! Scheduler dial failure  → Down        (provisional, until next snapshot)
//! ```
//!
//! # Design Decisions
//! - Snapshots carry absolute flags, so re-applying one is idempotent
//! - Status mirrors are fed with `try_send` and can never block the monitor

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

use crate::config::schema::MAX_BACKENDS;

/// Liveness flag of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Up,
    Down,
}

impl HealthState {
    pub fn is_up(self) -> bool {
        self == HealthState::Up
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Up => f.write_str("up"),
            HealthState::Down => f.write_str("down"),
        }
    }
}

/// Point-in-time mapping from backend address to liveness.
pub type HealthSnapshot = HashMap<String, HealthState>;

/// Create the bounded channel snapshots travel on.
pub fn snapshot_channel() -> (mpsc::Sender<HealthSnapshot>, mpsc::Receiver<HealthSnapshot>) {
    mpsc::channel(MAX_BACKENDS)
}

/// Fans health snapshots out to the scheduler and to external mirrors.
///
/// The scheduler's queue is awaited (the actor always drains it); mirrors
/// such as a kernel-engine adapter or a standby replica only get what fits
/// into their queue.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    scheduler: mpsc::Sender<HealthSnapshot>,
    mirrors: Vec<mpsc::Sender<HealthSnapshot>>,
}

impl StatusPublisher {
    pub fn new(scheduler: mpsc::Sender<HealthSnapshot>) -> Self {
        Self {
            scheduler,
            mirrors: Vec::new(),
        }
    }

    /// Register an external consumer of health snapshots.
    pub fn subscribe(&mut self) -> mpsc::Receiver<HealthSnapshot> {
        let (tx, rx) = snapshot_channel();
        self.mirrors.push(tx);
        rx
    }

    /// Number of live mirrors.
    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }

    /// Deliver a snapshot. Returns false once the scheduler is gone.
    pub async fn publish(&mut self, snapshot: HealthSnapshot) -> bool {
        self.mirrors.retain(|mirror| match mirror.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Status mirror lagging, snapshot dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        self.scheduler.send(snapshot).await.is_ok()
    }
}
