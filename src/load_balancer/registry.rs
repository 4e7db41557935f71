//! Backend registry.
//!
//! # Responsibilities
//! - Hold the canonical health view of every configured backend
//! - Select a backend for a new session and count it as ongoing
//! - Merge health snapshots and provisional mark-downs
//!
//! Owned by the scheduler actor; nothing here is shared or locked.

use serde::Serialize;
use std::sync::Arc;

use crate::health::state::{HealthSnapshot, HealthState};
use crate::load_balancer::backend::{Backend, OngoingGuard};
use crate::load_balancer::connector::{Connector, TunnelSetup};
use crate::load_balancer::least_conn::LeastOngoing;
use crate::observability::metrics;

#[derive(Debug)]
struct Entry {
    backend: Arc<Backend>,
    health: HealthState,
}

/// Point-in-time view of one backend, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub address: String,
    pub health: HealthState,
    pub ongoing: usize,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub tunnel: bool,
}

/// The set of configured backends and their health.
#[derive(Debug)]
pub struct Registry {
    entries: Vec<Entry>,
    selector: LeastOngoing,
}

impl Registry {
    /// Create a registry; every backend starts Up until a snapshot says otherwise.
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        let entries = backends
            .into_iter()
            .map(|backend| {
                metrics::record_backend_health(backend.address(), true);
                Entry {
                    backend,
                    health: HealthState::Up,
                }
            })
            .collect();

        Self {
            entries,
            selector: LeastOngoing::new(),
        }
    }

    /// Register `addresses` in order, establishing tunnels where configured.
    pub async fn connect(addresses: &[String], tunnel: Option<&TunnelSetup>) -> Self {
        let mut backends = Vec::with_capacity(addresses.len());
        for address in addresses {
            let connector = Connector::establish(address, tunnel).await;
            backends.push(Arc::new(Backend::new(address.clone(), connector)));
        }
        Self::new(backends)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of backends currently Up.
    pub fn up_count(&self) -> usize {
        self.entries.iter().filter(|e| e.health.is_up()).count()
    }

    pub fn health(&self, address: &str) -> Option<HealthState> {
        self.entry(address).map(|e| e.health)
    }

    /// Choose the Up backend with the fewest ongoing sessions and count the
    /// new session against it before any dial happens.
    pub fn select(&mut self) -> Option<OngoingGuard> {
        let entries = &self.entries;
        let index = self.selector.select(entries.len(), |i| {
            let entry = &entries[i];
            entry.health.is_up().then(|| entry.backend.ongoing())
        })?;
        Some(self.entries[index].backend.acquire())
    }

    /// Provisionally mark a backend Down after an observed failure.
    ///
    /// Returns true if the state changed.
    pub fn mark_down(&mut self, address: &str) -> bool {
        self.set_health(address, HealthState::Down, "dial failure")
    }

    /// Merge a health snapshot. Addresses not in the snapshot are untouched.
    ///
    /// Returns the number of backends whose state changed.
    pub fn apply_snapshot(&mut self, snapshot: &HealthSnapshot) -> usize {
        let mut changed = 0;
        for (address, state) in snapshot {
            if self.entry(address).is_none() {
                tracing::debug!(backend = %address, "Snapshot entry for unknown backend ignored");
                continue;
            }
            if self.set_health(address, *state, "health check") {
                changed += 1;
            }
        }
        changed
    }

    /// Status of every backend, in configuration order.
    pub fn status(&self) -> Vec<BackendStatus> {
        self.entries
            .iter()
            .map(|e| BackendStatus {
                address: e.backend.address().to_string(),
                health: e.health,
                ongoing: e.backend.ongoing(),
                rx_bytes: e.backend.rx_bytes(),
                tx_bytes: e.backend.tx_bytes(),
                tunnel: e.backend.connector().is_tunnel(),
            })
            .collect()
    }

    fn entry(&self, address: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.backend.address() == address)
    }

    fn set_health(&mut self, address: &str, state: HealthState, cause: &'static str) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.backend.address() == address)
        else {
            return false;
        };
        if entry.health == state {
            return false;
        }

        entry.health = state;
        metrics::record_backend_health(address, state.is_up());
        match state {
            HealthState::Up => tracing::info!(backend = %address, cause, "Backend marked up"),
            HealthState::Down => tracing::warn!(backend = %address, cause, "Backend marked down"),
        }
        true
    }
}
