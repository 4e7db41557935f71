//! Bidirectional byte forwarding.
//!
//! # Responsibilities
//! - Copy client → backend and backend → client concurrently
//! - End the session as soon as either leg finishes, closing both ends
//! - Account the bytes moved on the backend, even when a leg failed
//!
//! # Design Decisions
//! - No retries: once bytes flow, the client may have seen partial data
//! - The `OngoingGuard` is consumed here, so release happens exactly once

use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::load_balancer::backend::OngoingGuard;

/// Default buffer size for each copy leg.
const BUFFER_SIZE: usize = 16 * 1024;

/// Direction of a copy leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → backend.
    Upstream,
    /// Backend → client.
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("client->backend"),
            Direction::Downstream => f.write_str("backend->client"),
        }
    }
}

/// Bytes moved by one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Traffic {
    /// Client → backend.
    pub rx_bytes: u64,
    /// Backend → client.
    pub tx_bytes: u64,
}

/// A copy leg failed after the session was established.
#[derive(Debug, Error)]
#[error("forwarding {direction} failed: {source}")]
pub struct ForwardError {
    pub direction: Direction,
    pub source: io::Error,
    /// Bytes moved before the failure; already recorded on the backend.
    pub traffic: Traffic,
}

/// Proxy bytes between `client` and `upstream` until either side is done.
pub async fn forward<C, U>(client: C, upstream: U, guard: OngoingGuard) -> Result<Traffic, ForwardError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
    let mut traffic = Traffic::default();

    let (direction, result) = {
        let upstream_leg = copy_leg(&mut client_read, &mut upstream_write, &mut traffic.rx_bytes);
        let downstream_leg = copy_leg(&mut upstream_read, &mut client_write, &mut traffic.tx_bytes);
        tokio::select! {
            result = upstream_leg => (Direction::Upstream, result),
            result = downstream_leg => (Direction::Downstream, result),
        }
    };

    // The other leg was cancelled; close both write sides so each peer sees EOF.
    let _ = upstream_write.shutdown().await;
    let _ = client_write.shutdown().await;

    guard.record_traffic(traffic.rx_bytes, traffic.tx_bytes);
    tracing::debug!(
        backend = %guard.address(),
        finished = %direction,
        rx_bytes = traffic.rx_bytes,
        tx_bytes = traffic.tx_bytes,
        "Forwarding session finished"
    );
    drop(guard);

    match result {
        Ok(()) => Ok(traffic),
        Err(source) => Err(ForwardError {
            direction,
            source,
            traffic,
        }),
    }
}

async fn copy_leg<R, W>(reader: &mut R, writer: &mut W, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        // Count per write so a partial chunk is still accounted on failure.
        let mut written = 0;
        while written < n {
            let w = writer.write(&buf[written..n]).await?;
            if w == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            written += w;
            *total += w as u64;
        }
    }
}
