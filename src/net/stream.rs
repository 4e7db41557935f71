//! Type-erased duplex byte streams.
//!
//! Client connections arrive over TCP or Unix sockets and backend connections
//! are either direct TCP sockets or logical tunnel streams; the scheduler and
//! forwarder only need read, write and close.

use tokio::io::{AsyncRead, AsyncWrite};

/// Any duplex byte stream that can move between tasks.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Owned, boxed [`ByteStream`].
pub type BoxedStream = Box<dyn ByteStream>;
