//! Active health checking (the monitor).
//!
//! # Responsibilities
//! - Probe every backend on a fixed interval, each in its own task
//! - Turn probe results into snapshots and publish them
//!
//! # Cycle
//! ```text
//! tick ─▶ spawn probes (skip those still in flight)
//!     ─▶ all results in      ─▶ publish snapshot
//!     ─▶ next tick comes first ─▶ publish what arrived
//! late result from an earlier cycle ─▶ publish it alone
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::{Id, JoinSet};
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::probe::{HealthProbe, ProbeError};
use crate::health::state::{HealthSnapshot, HealthState, StatusPublisher};
use crate::observability::metrics;

/// Results gathered for the current tick.
#[derive(Debug, Default)]
struct Cycle {
    pending: HashSet<String>,
    snapshot: HealthSnapshot,
}

pub struct HealthMonitor {
    backends: Vec<String>,
    probe: Arc<dyn HealthProbe>,
    publisher: StatusPublisher,
    interval: Duration,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        backends: Vec<String>,
        probe: Arc<dyn HealthProbe>,
        publisher: StatusPublisher,
        config: &HealthCheckConfig,
    ) -> Self {
        Self {
            backends,
            probe,
            publisher,
            interval: config.interval(),
            timeout: config.timeout(),
        }
    }

    /// Override the probe interval and timeout.
    pub fn with_timing(mut self, interval: Duration, timeout: Duration) -> Self {
        self.interval = interval;
        self.timeout = timeout;
        self
    }

    /// Probe until shutdown. In-flight probes are aborted on exit.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            backends = self.backends.len(),
            interval = ?self.interval,
            timeout = ?self.timeout,
            mirrors = self.publisher.mirror_count(),
            "Health monitor starting"
        );

        // The first tick completes immediately.
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut probes: JoinSet<(String, HealthState)> = JoinSet::new();
        let mut in_flight: HashMap<Id, String> = HashMap::new();
        let mut cycle: Option<Cycle> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(partial) = cycle.take() {
                        tracing::debug!(
                            missing = partial.pending.len(),
                            "Probes overran the interval, publishing partial snapshot"
                        );
                        if !self.publish(partial.snapshot).await {
                            break;
                        }
                    }
                    cycle = self.start_cycle(&mut probes, &mut in_flight);
                }
                Some(joined) = probes.join_next_with_id() => {
                    let (address, state) = match joined {
                        Ok((id, result)) => {
                            in_flight.remove(&id);
                            result
                        }
                        Err(e) => {
                            let Some(address) = in_flight.remove(&e.id()) else {
                                continue;
                            };
                            tracing::error!(backend = %address, error = %e, "Probe task failed");
                            (address, HealthState::Down)
                        }
                    };

                    if let Some(snapshot) = Self::collect(&mut cycle, address, state) {
                        if !self.publish(snapshot).await {
                            break;
                        }
                    }
                }
            }
        }

        probes.shutdown().await;
        tracing::info!("Health monitor stopped");
    }

    fn start_cycle(&self, probes: &mut JoinSet<(String, HealthState)>, in_flight: &mut HashMap<Id, String>) -> Option<Cycle> {
        let mut cycle = Cycle::default();

        for address in &self.backends {
            if in_flight.values().any(|a| a == address) {
                tracing::debug!(backend = %address, "Previous probe still running, not restarted");
                continue;
            }

            let probe = Arc::clone(&self.probe);
            let timeout = self.timeout;
            let target = address.clone();
            let handle = probes.spawn(async move {
                let state = check(probe.as_ref(), &target, timeout).await;
                (target, state)
            });
            in_flight.insert(handle.id(), address.clone());
            cycle.pending.insert(address.clone());
        }

        (!cycle.pending.is_empty()).then_some(cycle)
    }

    /// File a result. Returns a snapshot when one is ready to publish.
    fn collect(cycle: &mut Option<Cycle>, address: String, state: HealthState) -> Option<HealthSnapshot> {
        let current = match cycle.as_mut() {
            Some(current) if current.pending.contains(&address) => current,
            _ => {
                tracing::debug!(backend = %address, state = %state, "Late probe result");
                return Some(HealthSnapshot::from([(address, state)]));
            }
        };

        current.pending.remove(&address);
        current.snapshot.insert(address, state);
        if current.pending.is_empty() {
            cycle.take().map(|done| done.snapshot)
        } else {
            None
        }
    }

    /// Returns false once the scheduler is gone.
    async fn publish(&mut self, snapshot: HealthSnapshot) -> bool {
        let up = snapshot.values().filter(|s| s.is_up()).count();
        tracing::debug!(entries = snapshot.len(), up, "Publishing health snapshot");
        if self.publisher.publish(snapshot).await {
            true
        } else {
            tracing::info!("Scheduler gone, health monitor stopping");
            false
        }
    }
}

async fn check(probe: &dyn HealthProbe, address: &str, timeout: Duration) -> HealthState {
    let started = Instant::now();
    let result = match time::timeout(timeout, probe.probe(address)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };
    metrics::record_probe_duration(address, started.elapsed());

    match result {
        Ok(()) => {
            tracing::trace!(backend = %address, "Health check passed");
            HealthState::Up
        }
        Err(e) => {
            tracing::warn!(backend = %address, error = %e, "Health check failed");
            HealthState::Down
        }
    }
}
