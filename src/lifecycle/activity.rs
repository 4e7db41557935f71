//! Active/standby gate.
//!
//! An external leader election (or an operator) decides whether this
//! instance should serve traffic. The acceptors consult the gate for every
//! connection; while inactive they close connections right after accept.

use tokio::sync::watch;

/// Read side, held by the acceptors.
#[derive(Debug, Clone)]
pub struct ActivityGate {
    rx: watch::Receiver<bool>,
}

/// Write side, held by whatever decides leadership.
#[derive(Debug)]
pub struct ActivitySwitch {
    tx: watch::Sender<bool>,
}

impl ActivityGate {
    /// Create a linked switch and gate starting in `active`.
    pub fn channel(active: bool) -> (ActivitySwitch, ActivityGate) {
        let (tx, rx) = watch::channel(active);
        (ActivitySwitch { tx }, ActivityGate { rx })
    }

    /// A gate that never closes.
    pub fn always_active() -> Self {
        // The value survives the sender being dropped.
        Self::channel(true).1
    }

    pub fn is_active(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Default for ActivityGate {
    fn default() -> Self {
        Self::always_active()
    }
}

impl ActivitySwitch {
    /// Flip the gate. Only transitions are logged.
    pub fn set_active(&self, active: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
        if changed {
            if active {
                tracing::info!("Instance became active, serving traffic");
            } else {
                tracing::warn!("Instance became standby, refusing traffic");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        *self.tx.borrow()
    }
}
