//! Listener with backpressure.
//!
//! # Responsibilities
//! - Bind TCP and Unix stream sockets from `tcp://` / `unix://` URLs
//! - Enforce the concurrent connection limit via a shared semaphore
//! - Hand accepted connections to the scheduler
//! - Remove stale Unix socket files before bind and our own after close

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

use crate::lifecycle::activity::ActivityGate;
use crate::load_balancer::scheduler::{Request, SchedulerHandle};
use crate::net::stream::BoxedStream;
use crate::observability::metrics;

const TCP_SCHEME: &str = "tcp://";
const UNIX_SCHEME: &str = "unix://";

/// Upper bound on the pause after a resource-exhaustion accept error.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: ListenAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    #[error("connection limit closed")]
    Closed,
}

/// Where to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// `host:port`
    Tcp(String),
    /// Filesystem path of a Unix domain socket.
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = ListenerError;

    /// Accepts `tcp://host:port`, `unix:///path` or a bare `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ListenerError::InvalidAddress(s.to_string());

        if let Some(path) = s.strip_prefix(UNIX_SCHEME) {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(ListenAddr::Unix(PathBuf::from(path)));
        }

        let hostport = match s.strip_prefix(TCP_SCHEME) {
            Some(rest) => rest,
            None if s.contains("://") => return Err(invalid()),
            None => s,
        };
        match hostport.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(ListenAddr::Tcp(hostport.to_string()))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "{}{}", TCP_SCHEME, addr),
            ListenAddr::Unix(path) => write!(f, "{}{}", UNIX_SCHEME, path.display()),
        }
    }
}

enum Socket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A bound socket that limits concurrent connections.
///
/// When the limit is reached, accepting waits until a session ends.
pub struct Listener {
    socket: Socket,
    local_addr: ListenAddr,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Bind `address`, drawing connection slots from `connection_limit`.
    ///
    /// Several listeners may share one limit.
    pub async fn bind(address: &ListenAddr, connection_limit: Arc<Semaphore>) -> Result<Self, ListenerError> {
        let bind_error = |source: io::Error| ListenerError::Bind {
            address: address.clone(),
            source,
        };

        let (socket, local_addr) = match address {
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await.map_err(bind_error)?;
                let local = listener.local_addr().map_err(bind_error)?;
                (Socket::Tcp(listener), ListenAddr::Tcp(local.to_string()))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                clear_stale_socket(path).await.map_err(bind_error)?;
                let listener = UnixListener::bind(path).map_err(bind_error)?;
                (Socket::Unix(listener), address.clone())
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => {
                return Err(bind_error(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not supported on this platform",
                )))
            }
        };

        tracing::info!(
            address = %local_addr,
            available_permits = connection_limit.available_permits(),
            "Listener bound"
        );

        Ok(Self {
            socket,
            local_addr,
            connection_limit,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream, a peer label and a permit that must be held for
    /// the connection's lifetime.
    pub async fn accept(&self) -> Result<(BoxedStream, String, ConnectionPermit), ListenerError> {
        // Permit first: at the limit, pending connections stay in the kernel backlog.
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer): (BoxedStream, String) = match &self.socket {
            Socket::Tcp(listener) => {
                let (stream, addr) = listener.accept().await.map_err(ListenerError::Accept)?;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(peer_addr = %addr, error = %e, "Failed to set TCP_NODELAY");
                }
                (Box::new(stream), addr.to_string())
            }
            #[cfg(unix)]
            Socket::Unix(listener) => {
                let (stream, _) = listener.accept().await.map_err(ListenerError::Accept)?;
                (Box::new(stream), self.local_addr.to_string())
            }
        };

        tracing::debug!(
            peer_addr = %peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, peer, ConnectionPermit { _permit: permit }))
    }

    /// The bound address; for TCP the actual port is filled in.
    pub fn local_addr(&self) -> &ListenAddr {
        &self.local_addr
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let ListenAddr::Unix(path) = &self.local_addr {
            if let Err(e) = remove_socket_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the slot is released back to the shared limit.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

fn remove_socket_file(path: &std::path::Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove a leftover socket file at `path` so it can be bound again.
///
/// Only a socket nobody answers on is removed. A live socket or any other
/// kind of file is reported as `AddrInUse`.
#[cfg(unix)]
async fn clear_stale_socket(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "path exists and is not a socket",
        ));
    }
    if tokio::net::UnixStream::connect(path).await.is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "socket is served by another process",
        ));
    }

    tracing::info!(path = %path.display(), "Removing stale socket file");
    remove_socket_file(path)
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Accept connections and submit them to the scheduler until shutdown.
///
/// While `gate` is inactive, accepted connections are closed immediately.
/// The listener (and its socket file) is released when this returns.
pub async fn accept_loop(
    listener: Listener,
    scheduler: SchedulerHandle,
    gate: ActivityGate,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ListenerError> {
    let address = listener.local_addr().clone();
    let mut backoff = Duration::from_millis(100);

    loop {
        let accepted = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(address = %address, "Acceptor received shutdown signal");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer, permit) = match accepted {
            Ok(accepted) => {
                backoff = Duration::from_millis(100);
                accepted
            }
            Err(ListenerError::Accept(e)) if is_connection_error(&e) => {
                tracing::debug!(address = %address, error = %e, "Transient accept error");
                continue;
            }
            Err(ListenerError::Accept(e)) => {
                tracing::warn!(address = %address, error = %e, backoff = ?backoff, "Accept failed, backing off");
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
                continue;
            }
            Err(e) => return Err(e),
        };

        metrics::record_accepted();
        if !gate.is_active() {
            tracing::debug!(peer_addr = %peer, "Balancer inactive, connection closed");
            continue;
        }

        let request = Request::from_boxed(stream, peer).with_permit(permit);
        tokio::select! {
            _ = shutdown.recv() => break,
            submitted = scheduler.submit(request) => {
                if submitted.is_err() {
                    tracing::info!(address = %address, "Scheduler gone, acceptor stopping");
                    break;
                }
            }
        }
    }

    tracing::info!(address = %address, "Listener closed");
    Ok(())
}
