//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and bind every listener
//! - Build the registry (establishing tunnels where configured)
//! - Spawn the scheduler, the health monitor and one acceptor per listener
//! - Provide the join barrier used at shutdown
//!
//! # Design Decisions
//! - Fail fast: bind errors and invalid config are fatal
//! - Listeners bind before any task starts, so a failed start leaves nothing running
//! - Forwarding sessions are not cancelled on shutdown; the barrier waits for them

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::config::validation::validate_config;
use crate::config::{BalancerConfig, ConfigError};
use crate::health::active::HealthMonitor;
use crate::health::probe::{self, HealthProbe, ProbeError};
use crate::health::state::{snapshot_channel, HealthSnapshot, StatusPublisher};
use crate::lifecycle::activity::ActivityGate;
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::connector::{TunnelDialer, TunnelSetup};
use crate::load_balancer::registry::Registry;
use crate::load_balancer::scheduler::{Scheduler, SchedulerHandle, SchedulerSettings};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{accept_loop, ListenAddr, Listener, ListenerError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to build health probe: {0}")]
    Probe(#[from] ProbeError),
}

/// Builder for a balancer instance.
pub struct Balancer {
    config: BalancerConfig,
    tunnel_dialer: Option<Arc<dyn TunnelDialer>>,
    probe: Option<Arc<dyn HealthProbe>>,
    gate: ActivityGate,
    publisher: StatusPublisher,
    snapshots: mpsc::Receiver<HealthSnapshot>,
}

impl Balancer {
    pub fn new(config: BalancerConfig) -> Self {
        let (snapshot_tx, snapshot_rx) = snapshot_channel();
        Self {
            config,
            tunnel_dialer: None,
            probe: None,
            gate: ActivityGate::always_active(),
            publisher: StatusPublisher::new(snapshot_tx),
            snapshots: snapshot_rx,
        }
    }

    /// Transport used for backends when `[tunnel] enabled = true`.
    pub fn with_tunnel_dialer(mut self, dialer: Arc<dyn TunnelDialer>) -> Self {
        self.tunnel_dialer = Some(dialer);
        self
    }

    /// Replace the probe chosen by `[health_check] probe`.
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_activity_gate(mut self, gate: ActivityGate) -> Self {
        self.gate = gate;
        self
    }

    /// Receive a copy of every health snapshot the monitor publishes.
    pub fn subscribe_status(&mut self) -> mpsc::Receiver<HealthSnapshot> {
        self.publisher.subscribe()
    }

    /// Bind, spawn every task and return once traffic is being accepted.
    pub async fn start(self, shutdown: &Shutdown) -> Result<RunningBalancer, StartupError> {
        let Balancer {
            config,
            tunnel_dialer,
            probe,
            gate,
            publisher,
            snapshots,
        } = self;

        validate_config(&config).map_err(ConfigError::Validation)?;

        let connection_limit = Arc::new(Semaphore::new(config.listener.max_connections));
        let mut listeners = Vec::with_capacity(config.listener.listen.len());
        for listen in &config.listener.listen {
            let address: ListenAddr = listen.parse()?;
            listeners.push(Listener::bind(&address, Arc::clone(&connection_limit)).await?);
        }

        let probe = match (config.health_check.enabled, probe) {
            (false, _) => None,
            (true, Some(probe)) => Some(probe),
            (true, None) => Some(probe::from_config(&config.health_check)?),
        };

        let tunnel = match (config.tunnel.enabled, tunnel_dialer) {
            (true, Some(dialer)) => Some(TunnelSetup {
                dialer,
                port: config.tunnel.port,
                timeout: config.tunnel.ping_timeout(),
            }),
            (true, None) => {
                tracing::warn!("Tunnel mode enabled but no tunnel transport available, dialing directly");
                None
            }
            (false, _) => None,
        };
        let registry = Registry::connect(&config.backends, tunnel.as_ref()).await;

        let sessions = ConnectionTracker::new();
        let (scheduler, handle) = Scheduler::new(
            registry,
            SchedulerSettings::from(&config.scheduler),
            snapshots,
            sessions.clone(),
            config.scheduler.request_queue,
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(scheduler.run(shutdown.subscribe()));

        match probe {
            Some(probe) => {
                let monitor = HealthMonitor::new(config.backends.clone(), probe, publisher, &config.health_check);
                tasks.spawn(monitor.run(shutdown.subscribe()));
            }
            None => tracing::info!("Active health checks disabled"),
        }

        let mut local_addrs = Vec::with_capacity(listeners.len());
        for listener in listeners {
            local_addrs.push(listener.local_addr().clone());
            let acceptor = accept_loop(listener, handle.clone(), gate.clone(), shutdown.subscribe());
            tasks.spawn(async move {
                if let Err(e) = acceptor.await {
                    tracing::error!(error = %e, "Acceptor stopped");
                }
            });
        }

        tracing::info!(
            backends = config.backends.len(),
            listeners = local_addrs.len(),
            max_connections = config.listener.max_connections,
            "Balancer started"
        );

        Ok(RunningBalancer {
            scheduler: handle,
            local_addrs,
            tasks,
            sessions,
        })
    }
}

/// A started balancer.
pub struct RunningBalancer {
    scheduler: SchedulerHandle,
    local_addrs: Vec<ListenAddr>,
    tasks: JoinSet<()>,
    sessions: ConnectionTracker,
}

impl RunningBalancer {
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Bound listener addresses, in configuration order.
    pub fn local_addrs(&self) -> &[ListenAddr] {
        &self.local_addrs
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.active_count()
    }

    /// Wait for every task to exit and every forwarding session to drain.
    ///
    /// Returns only after shutdown has been triggered.
    pub async fn wait(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Balancer task failed");
            }
        }

        let draining = self.sessions.active_count();
        if draining > 0 {
            tracing::info!(sessions = draining, "Waiting for forwarding sessions to drain");
        }
        self.sessions.wait_for_idle().await;
        tracing::info!("Shutdown complete");
    }
}
