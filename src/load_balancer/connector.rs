//! Backend connectors.
//!
//! # Variants
//! - `Direct`: a fresh TCP connection per request
//! - `Tunnel`: a logical stream over a persistent multiplexed connection
//!
//! The variant is fixed when the backend is registered; selection and
//! forwarding never look at it.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

use crate::net::stream::BoxedStream;

/// A persistent multiplexed connection to one backend.
#[async_trait]
pub trait Tunnel: Send + Sync + fmt::Debug {
    /// Round-trip a liveness ping; returns the measured latency.
    async fn ping(&self) -> io::Result<Duration>;

    /// Open a logical stream. Dropping the stream closes it.
    async fn open_stream(&self) -> io::Result<BoxedStream>;
}

/// Establishes tunnels; supplied by the transport implementation.
#[async_trait]
pub trait TunnelDialer: Send + Sync {
    async fn dial(&self, address: &str) -> io::Result<Arc<dyn Tunnel>>;
}

/// Tunnel parameters used while registering backends.
#[derive(Clone)]
pub struct TunnelSetup {
    pub dialer: Arc<dyn TunnelDialer>,
    pub port: u16,
    pub timeout: Duration,
}

impl fmt::Debug for TunnelSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelSetup")
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// How connections to a backend are opened.
#[derive(Debug, Clone)]
pub enum Connector {
    Direct,
    Tunnel(Arc<dyn Tunnel>),
}

impl Connector {
    /// Pick the connector for `address`.
    ///
    /// Falls back to direct dialing when no tunnel is configured, the tunnel
    /// cannot be established, or its initial ping fails.
    pub async fn establish(address: &str, tunnel: Option<&TunnelSetup>) -> Self {
        let Some(setup) = tunnel else {
            return Connector::Direct;
        };

        let endpoint = tunnel_endpoint(address, setup.port);
        let attempt = async {
            let tunnel = setup.dialer.dial(&endpoint).await?;
            let latency = tunnel.ping().await?;
            Ok::<_, io::Error>((tunnel, latency))
        };

        match time::timeout(setup.timeout, attempt).await {
            Ok(Ok((tunnel, latency))) => {
                tracing::info!(backend = %address, endpoint = %endpoint, ?latency, "Tunnel established");
                Connector::Tunnel(tunnel)
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %address, endpoint = %endpoint, error = %e, "Tunnel unavailable, dialing directly");
                Connector::Direct
            }
            Err(_) => {
                tracing::warn!(backend = %address, endpoint = %endpoint, "Tunnel setup timed out, dialing directly");
                Connector::Direct
            }
        }
    }

    pub fn is_tunnel(&self) -> bool {
        matches!(self, Connector::Tunnel(_))
    }

    /// Open a connection to `address`, bounded by `timeout`.
    pub async fn open(&self, address: &str, timeout: Duration) -> io::Result<BoxedStream> {
        let connect = async {
            match self {
                Connector::Direct => dial_direct(address).await,
                Connector::Tunnel(tunnel) => tunnel.open_stream().await,
            }
        };

        time::timeout(timeout, connect).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", address, timeout),
            )
        })?
    }
}

async fn dial_direct(address: &str) -> io::Result<BoxedStream> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}

/// Host part of a `host:port` address.
pub fn host_of(address: &str) -> &str {
    address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(address)
}

fn tunnel_endpoint(address: &str, port: u16) -> String {
    format!("{}:{}", host_of(address), port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Debug)]
    struct DuplexTunnel;

    #[async_trait]
    impl Tunnel for DuplexTunnel {
        async fn ping(&self) -> io::Result<Duration> {
            Ok(Duration::from_millis(1))
        }

        async fn open_stream(&self) -> io::Result<BoxedStream> {
            let (near, mut far) = tokio::io::duplex(64);
            tokio::spawn(async move {
                let _ = far.write_all(b"tunnel").await;
            });
            Ok(Box::new(near))
        }
    }

    struct RecordingDialer {
        dialed: Mutex<Vec<String>>,
        healthy: bool,
    }

    #[async_trait]
    impl TunnelDialer for RecordingDialer {
        async fn dial(&self, address: &str) -> io::Result<Arc<dyn Tunnel>> {
            self.dialed.lock().unwrap().push(address.to_string());
            if self.healthy {
                Ok(Arc::new(DuplexTunnel))
            } else {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no tunnel"))
            }
        }
    }

    fn setup(healthy: bool) -> (TunnelSetup, Arc<RecordingDialer>) {
        let dialer = Arc::new(RecordingDialer {
            dialed: Mutex::new(Vec::new()),
            healthy,
        });
        let setup = TunnelSetup {
            dialer: dialer.clone(),
            port: 6900,
            timeout: Duration::from_secs(1),
        };
        (setup, dialer)
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("10.0.0.1:3306"), "10.0.0.1");
        assert_eq!(host_of("[::1]:3306"), "[::1]");
        assert_eq!(host_of("db"), "db");
        assert_eq!(tunnel_endpoint("db.local:3306", 6900), "db.local:6900");
    }

    #[tokio::test]
    async fn uses_tunnel_when_ping_succeeds() {
        let (setup, dialer) = setup(true);
        let connector = Connector::establish("10.0.0.1:3306", Some(&setup)).await;
        assert!(connector.is_tunnel());
        assert_eq!(*dialer.dialed.lock().unwrap(), vec!["10.0.0.1:6900".to_string()]);

        let mut stream = connector
            .open("10.0.0.1:3306", Duration::from_secs(1))
            .await
            .unwrap();
        let mut buf = [0u8; 6];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"tunnel");
    }

    #[tokio::test]
    async fn falls_back_to_direct() {
        let (setup, _) = setup(false);
        let connector = Connector::establish("10.0.0.1:3306", Some(&setup)).await;
        assert!(!connector.is_tunnel());
        assert!(!Connector::establish("10.0.0.1:3306", None).await.is_tunnel());
    }

    #[tokio::test]
    async fn direct_dial_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let stream = Connector::Direct.open(&address, Duration::from_secs(1)).await;
        assert!(stream.is_ok());
        assert!(listener.accept().await.is_ok());
    }

    #[tokio::test]
    async fn direct_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Connector::Direct
            .open(&address, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
