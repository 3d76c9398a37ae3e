//! TCP/UDP byte transports, receive/send loops, deadlines, heartbeats, and teardown for strand.
//!
//! This crate turns a connected socket into a [`Session`]: a receive loop that
//! feeds a [`strand_wire::PackParser`] and hands complete frames to a
//! [`SessionHandler`], and a send loop that drains a bounded FIFO of outbound
//! buffers. Every session reports exactly one disconnect.
//!
//! ## Features
//!
//! - **Socket Sessions**: [`SocketSession`] over TCP streams or connected UDP sockets
//! - **Deadlines**: Per-direction receive and send timeouts
//! - **Heartbeat**: Configurable payload queued whenever the send side idles
//! - **Flow Control**: Optional send queue capacity with immediate `QueueFull`
//! - **Registry**: Concurrent id-to-session map with optional capacity
//! - **Acceptor / Client**: Inbound factory loop and outbound dialer with login and reconnect
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use strand_session::{handler_fn, Session, SessionOptions, SocketSession};
//! use strand_wire::DigitPrefixed;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:9000").await?;
//! let handler = handler_fn(
//!     |id, kind, frame| println!("session {} got kind {}: {:?}", id, kind, frame),
//!     |id, reason| println!("session {} closed: {}", id, reason),
//! );
//!
//! let session = SocketSession::new(1, stream, Arc::new(DigitPrefixed), Arc::new(handler));
//! session.set_options(SessionOptions {
//!     heartbeat_interval: Duration::from_secs(5),
//!     heartbeat_payload: Bytes::from_static(b"0"),
//!     ..Default::default()
//! })?;
//! session.start()?;
//! session.send(DigitPrefixed::encode(b"hello"))?;
//! session.closed().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acceptor;
pub mod client;
pub mod deadline;
pub mod error;
pub mod queue;
pub mod registry;
pub mod session;
pub mod socket_session;
pub mod transport;

// Re-export main types
pub use acceptor::Acceptor;
pub use client::{Client, ClientConfig, Connector, TcpConnector, UdpConnector};
pub use deadline::Deadline;
pub use error::{code, Direction, DisconnectReason, SessionError};
pub use queue::SendQueue;
pub use registry::SessionRegistry;
pub use session::{
    handler_fn, FnHandler, Session, SessionHandler, SessionId, SessionOptions, SessionState,
    SessionStats,
};
pub use socket_session::SocketSession;
pub use transport::{
    connect_tcp, connect_udp, connect_udp_from, listen_tcp, ByteTransport, MAX_DATAGRAM_SIZE,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
