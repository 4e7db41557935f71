//! Scheduler actor.
//!
//! # Data Flow
//! ```text
//! Acceptor ──Request──▶ ┌───────────┐ ──spawn──▶ dial ──▶ forward ──▶ notify
//!                       │ Scheduler │               │
//! Monitor ──Snapshot──▶ │ (Registry)│ ◀─DialFailed──┘
//! Handle ───Status────▶ └───────────┘
//! ```
//!
//! # Design Decisions
//! - One task owns the registry, so health has a single writer
//! - Dials run in their own tasks; a slow backend never stalls selection
//! - A failed dial releases its `ongoing` slot before the actor hears about
//!   it, so the retry sees the corrected load

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::SchedulerConfig;
use crate::health::state::HealthSnapshot;
use crate::load_balancer::registry::{BackendStatus, Registry};
use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::forward::{forward, Traffic};
use crate::net::listener::ConnectionPermit;
use crate::net::stream::{BoxedStream, ByteStream};
use crate::observability::metrics;

/// Terminal scheduling failures. The client connection is closed in every case.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("no backend is up")]
    NoBackendAvailable,

    #[error("backend {address} unreachable: {source}")]
    BackendUnreachable {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("all backends unreachable after {attempts} attempts")]
    AllBackendsUnreachable { attempts: usize },

    #[error("scheduler is not running")]
    SchedulerClosed,
}

impl ScheduleError {
    /// Short label used as the metrics outcome.
    pub fn label(&self) -> &'static str {
        match self {
            ScheduleError::NoBackendAvailable => "no_backend",
            ScheduleError::BackendUnreachable { .. } => "unreachable",
            ScheduleError::AllBackendsUnreachable { .. } => "all_unreachable",
            ScheduleError::SchedulerClosed => "closed",
        }
    }
}

/// How a forwarded session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub backend: String,
    pub traffic: Traffic,
    /// Set when a copy leg failed rather than reaching EOF.
    pub io_error: Option<io::ErrorKind>,
}

/// Result delivered to a request's completion notifier.
pub type SessionOutcome = Result<SessionSummary, ScheduleError>;

/// One accepted client connection waiting for a backend.
pub struct Request {
    id: ConnectionId,
    conn: BoxedStream,
    peer: String,
    permit: Option<ConnectionPermit>,
    attempts: usize,
    notify: Option<oneshot::Sender<SessionOutcome>>,
}

impl Request {
    pub fn new(conn: impl ByteStream + 'static, peer: impl Into<String>) -> Self {
        Self::from_boxed(Box::new(conn), peer)
    }

    /// Like [`Request::new`] for a stream that is already boxed.
    pub fn from_boxed(conn: BoxedStream, peer: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            conn,
            peer: peer.into(),
            permit: None,
            attempts: 0,
            notify: None,
        }
    }

    /// Hold the listener's connection slot for the lifetime of the session.
    pub fn with_permit(mut self, permit: ConnectionPermit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Ask to be told how the session ended.
    pub fn notify_on_completion(mut self) -> (Self, oneshot::Receiver<SessionOutcome>) {
        let (tx, rx) = oneshot::channel();
        self.notify = Some(tx);
        (self, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Close the client connection and report why.
    fn fail(self, error: ScheduleError) {
        tracing::warn!(
            connection_id = %self.id,
            peer = %self.peer,
            attempts = self.attempts,
            error = %error,
            "Client connection refused"
        );
        metrics::record_schedule_outcome(error.label());
        if let Some(notify) = self.notify {
            let _ = notify.send(Err(error));
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Scheduling knobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub failover: bool,
    pub dial_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            failover: false,
            dial_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            failover: config.failover,
            dial_timeout: config.dial_timeout(),
        }
    }
}

enum Command {
    DialFailed {
        request: Request,
        address: String,
        error: io::Error,
    },
    Status(oneshot::Sender<Vec<BackendStatus>>),
}

/// The actor that owns the registry.
pub struct Scheduler {
    registry: Registry,
    settings: SchedulerSettings,
    requests: mpsc::Receiver<Request>,
    snapshots: mpsc::Receiver<HealthSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
    feedback: mpsc::UnboundedSender<Command>,
    sessions: ConnectionTracker,
}

impl Scheduler {
    /// Create the actor and the handle used to talk to it.
    ///
    /// `queue` bounds the number of accepted connections waiting for selection.
    pub fn new(
        registry: Registry,
        settings: SchedulerSettings,
        snapshots: mpsc::Receiver<HealthSnapshot>,
        sessions: ConnectionTracker,
        queue: usize,
    ) -> (Self, SchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(queue.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            registry,
            settings,
            requests: request_rx,
            snapshots,
            commands: command_rx,
            feedback: command_tx.clone(),
            sessions,
        };
        let handle = SchedulerHandle {
            requests: request_tx,
            commands: command_tx,
        };
        (scheduler, handle)
    }

    /// Serve requests until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            backends = self.registry.len(),
            failover = self.settings.failover,
            dial_timeout = ?self.settings.dial_timeout,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Scheduler received shutdown signal");
                    break;
                }
                Some(snapshot) = self.snapshots.recv() => {
                    let changed = self.registry.apply_snapshot(&snapshot);
                    tracing::debug!(
                        entries = snapshot.len(),
                        changed,
                        up = self.registry.up_count(),
                        "Health snapshot applied"
                    );
                }
                Some(command) = self.commands.recv() => self.handle_command(command),
                request = self.requests.recv() => match request {
                    Some(request) => self.dispatch(request),
                    None => {
                        tracing::info!("All scheduler handles dropped");
                        break;
                    }
                },
            }
        }

        self.close();
        tracing::info!("Scheduler stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::DialFailed {
                request,
                address,
                error,
            } => self.on_dial_failed(request, address, error),
            Command::Status(reply) => {
                let _ = reply.send(self.registry.status());
            }
        }
    }

    fn dispatch(&mut self, mut request: Request) {
        let Some(guard) = self.registry.select() else {
            let error = if request.attempts == 0 {
                ScheduleError::NoBackendAvailable
            } else {
                ScheduleError::AllBackendsUnreachable {
                    attempts: request.attempts,
                }
            };
            request.fail(error);
            return;
        };

        request.attempts += 1;
        tracing::debug!(
            connection_id = %request.id,
            peer = %request.peer,
            backend = %guard.address(),
            attempt = request.attempts,
            ongoing = guard.ongoing(),
            "Backend selected"
        );

        let session = self.sessions.track(request.id);
        let feedback = self.feedback.clone();
        let dial_timeout = self.settings.dial_timeout;

        tokio::spawn(async move {
            let _session = session;
            match guard.open(dial_timeout).await {
                Ok(upstream) => {
                    let Request {
                        id,
                        conn,
                        peer,
                        permit,
                        notify,
                        ..
                    } = request;
                    let backend = guard.address().to_string();

                    let summary = match forward(conn, upstream, guard).await {
                        Ok(traffic) => SessionSummary {
                            backend,
                            traffic,
                            io_error: None,
                        },
                        Err(e) => {
                            tracing::info!(connection_id = %id, peer = %peer, backend = %backend, error = %e, "Session ended with I/O error");
                            SessionSummary {
                                backend,
                                traffic: e.traffic,
                                io_error: Some(e.source.kind()),
                            }
                        }
                    };
                    drop(permit);

                    metrics::record_schedule_outcome("forwarded");
                    if let Some(notify) = notify {
                        let _ = notify.send(Ok(summary));
                    }
                }
                Err(error) => {
                    let address = guard.address().to_string();
                    drop(guard);
                    let command = Command::DialFailed {
                        request,
                        address,
                        error,
                    };
                    if let Err(mpsc::error::SendError(Command::DialFailed { request, .. })) = feedback.send(command) {
                        request.fail(ScheduleError::SchedulerClosed);
                    }
                }
            }
        });
    }

    fn on_dial_failed(&mut self, request: Request, address: String, error: io::Error) {
        self.registry.mark_down(&address);
        tracing::warn!(
            connection_id = %request.id,
            backend = %address,
            attempt = request.attempts,
            error = %error,
            "Backend dial failed"
        );

        if !self.settings.failover {
            request.fail(ScheduleError::BackendUnreachable {
                address,
                source: error,
            });
        } else if request.attempts >= self.registry.len() {
            let attempts = request.attempts;
            request.fail(ScheduleError::AllBackendsUnreachable { attempts });
        } else {
            self.dispatch(request);
        }
    }

    /// Refuse whatever is still queued so no client waits on a dead actor.
    fn close(&mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            request.fail(ScheduleError::SchedulerClosed);
        }
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::DialFailed { request, .. } = command {
                request.fail(ScheduleError::SchedulerClosed);
            }
        }
    }
}

/// Cloneable entry point to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    requests: mpsc::Sender<Request>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Queue a connection for scheduling.
    ///
    /// Waits while the queue is full. If the scheduler has stopped, the
    /// connection is closed and its notifier told so.
    pub async fn submit(&self, request: Request) -> Result<(), ScheduleError> {
        self.requests
            .send(request)
            .await
            .map_err(|mpsc::error::SendError(request)| {
                request.fail(ScheduleError::SchedulerClosed);
                ScheduleError::SchedulerClosed
            })
    }

    /// Registry view of every backend, in configuration order.
    pub async fn backend_status(&self) -> Result<Vec<BackendStatus>, ScheduleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .map_err(|_| ScheduleError::SchedulerClosed)?;
        rx.await.map_err(|_| ScheduleError::SchedulerClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::DialFailed { request, address, .. } => f
                .debug_struct("DialFailed")
                .field("request", request)
                .field("address", address)
                .finish_non_exhaustive(),
            Command::Status(_) => f.write_str("Status"),
        }
    }
}
