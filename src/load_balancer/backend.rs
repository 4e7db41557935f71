//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server
//! - Track in-flight forwarding sessions (the load signal for selection)
//! - Accumulate traffic counters for the process lifetime
//!
//! Health is not stored here: it belongs to the registry, which only the
//! scheduler actor touches. Everything on this type is safe to update from
//! concurrent forwarding sessions.

use std::io;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::load_balancer::connector::Connector;
use crate::net::stream::BoxedStream;
use crate::observability::metrics;

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    address: String,
    connector: Connector,
    /// Forwarding sessions currently attributed to this backend.
    ongoing: AtomicUsize,
    /// Bytes forwarded client → backend.
    rx_bytes: AtomicU64,
    /// Bytes forwarded backend → client.
    tx_bytes: AtomicU64,
}

impl Backend {
    /// Create a new backend.
    pub fn new(address: impl Into<String>, connector: Connector) -> Self {
        Self {
            address: address.into(),
            connector,
            ongoing: AtomicUsize::new(0),
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Get the current number of ongoing sessions.
    pub fn ongoing(&self) -> usize {
        self.ongoing.load(Ordering::Acquire)
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes.load(Ordering::Relaxed)
    }

    /// Count a new session against this backend.
    ///
    /// The returned guard releases the slot when dropped, so every increment
    /// is paired with exactly one decrement.
    pub fn acquire(self: &Arc<Self>) -> OngoingGuard {
        let ongoing = self.ongoing.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_backend_ongoing(&self.address, ongoing);
        OngoingGuard {
            backend: Arc::clone(self),
        }
    }

    /// Add the bytes a finished session moved in each direction.
    pub fn record_traffic(&self, rx: u64, tx: u64) {
        self.rx_bytes.fetch_add(rx, Ordering::Relaxed);
        self.tx_bytes.fetch_add(tx, Ordering::Relaxed);
        metrics::record_traffic(&self.address, rx, tx);
    }

    /// Open a connection (or tunnel stream) to this backend.
    pub async fn open(&self, timeout: Duration) -> io::Result<BoxedStream> {
        self.connector.open(&self.address, timeout).await
    }

    fn release(&self) {
        let ongoing = self.ongoing.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::set_backend_ongoing(&self.address, ongoing);
    }
}

/// A RAII guard that holds one `ongoing` slot on a backend.
///
/// Dropping it is the release path for a session.
#[derive(Debug)]
pub struct OngoingGuard {
    backend: Arc<Backend>,
}

impl OngoingGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for OngoingGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for OngoingGuard {
    fn drop(&mut self) {
        self.backend.release();
    }
}
