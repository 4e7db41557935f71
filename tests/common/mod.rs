//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};

use tcp_balancer::health::state::{snapshot_channel, HealthSnapshot, HealthState};
use tcp_balancer::load_balancer::{
    Backend, Connector, Registry, Request, Scheduler, SchedulerHandle, SchedulerSettings, SessionOutcome, Tunnel,
};
use tcp_balancer::net::connection::ConnectionTracker;
use tcp_balancer::net::stream::BoxedStream;

/// A mock backend listening on an ephemeral port.
pub struct MockBackend {
    pub address: String,
    accepted: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Connections this backend has accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Start a backend that writes `tag` on accept, then echoes everything back.
pub async fn start_tagged_echo_backend(tag: u8) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        if socket.write_all(&[tag]).await.is_err() {
                            return;
                        }
                        let (mut reader, mut writer) = socket.split();
                        let _ = tokio::io::copy(&mut reader, &mut writer).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { address, accepted }
}

/// An address nothing listens on; dials are refused immediately.
pub async fn refused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

/// A tunnel whose streams never finish opening.
#[derive(Debug)]
pub struct HungTunnel;

#[async_trait]
impl Tunnel for HungTunnel {
    async fn ping(&self) -> io::Result<Duration> {
        Ok(Duration::from_millis(1))
    }

    async fn open_stream(&self) -> io::Result<BoxedStream> {
        std::future::pending().await
    }
}

/// A backend registered behind a [`HungTunnel`].
pub fn hung_backend(address: &str) -> Arc<Backend> {
    Arc::new(Backend::new(address, Connector::Tunnel(Arc::new(HungTunnel))))
}

/// A scheduler actor running in the background.
pub struct TestScheduler {
    pub handle: SchedulerHandle,
    pub snapshots: mpsc::Sender<HealthSnapshot>,
    pub sessions: ConnectionTracker,
    shutdown: broadcast::Sender<()>,
}

impl TestScheduler {
    pub fn start(addresses: &[String], failover: bool) -> Self {
        let backends = addresses
            .iter()
            .map(|a| Arc::new(Backend::new(a.clone(), Connector::Direct)))
            .collect();
        Self::with_backends(backends, failover, Duration::from_secs(1))
    }

    pub fn with_backends(backends: Vec<Arc<Backend>>, failover: bool, dial_timeout: Duration) -> Self {
        let registry = Registry::new(backends);
        let (snapshot_tx, snapshot_rx) = snapshot_channel();
        let sessions = ConnectionTracker::new();
        let settings = SchedulerSettings {
            failover,
            dial_timeout,
        };
        let (scheduler, handle) = Scheduler::new(registry, settings, snapshot_rx, sessions.clone(), 64);
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(scheduler.run(shutdown_rx));

        Self {
            handle,
            snapshots: snapshot_tx,
            sessions,
            shutdown,
        }
    }

    /// Hand a fresh in-memory client connection to the scheduler.
    pub async fn connect(&self) -> (DuplexStream, oneshot::Receiver<SessionOutcome>) {
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let (request, outcome) = Request::new(server_side, "test-client").notify_on_completion();
        self.handle.submit(request).await.unwrap();
        (client, outcome)
    }

    pub async fn apply(&self, entries: &[(&str, HealthState)]) {
        let snapshot = entries.iter().map(|(a, s)| (a.to_string(), *s)).collect();
        self.snapshots.send(snapshot).await.unwrap();
    }

    pub async fn health(&self) -> Vec<HealthState> {
        self.handle
            .backend_status()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.health)
            .collect()
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Read the backend tag, echo `payload` through the session and close it.
pub async fn round_trip(mut client: DuplexStream, payload: &[u8]) -> u8 {
    let mut tag = [0u8; 1];
    client.read_exact(&mut tag).await.unwrap();

    client.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
    tag[0]
}

/// Wait for a session outcome, failing the test if it takes too long.
pub async fn outcome(rx: oneshot::Receiver<SessionOutcome>) -> SessionOutcome {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("session did not finish in time")
        .expect("scheduler dropped the notifier")
}
