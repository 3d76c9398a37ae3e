//! Session contract shared by every transport.
//!
//! A [`Session`] is one logical connection to a peer. It owns its transport,
//! reports received frames and its single disconnect through a
//! [`SessionHandler`], and accepts outbound buffers through `send`.

use crate::error::{DisconnectReason, SessionError};
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Session identifier, unique within a registry
pub type SessionId = u64;

/// Lifecycle of a session. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Constructed, not yet started. Options may still change.
    Created,
    /// Receive and send loops running
    Active,
    /// Teardown in progress; no new work is accepted
    Closing,
    /// Teardown complete, transport released
    Closed,
}

impl SessionState {
    /// Whether the session has stopped accepting work
    pub fn is_stopped(self) -> bool {
        self >= SessionState::Closing
    }
}

/// One logical connection to a peer.
pub trait Session: Send + Sync {
    /// Session identifier
    fn id(&self) -> SessionId;

    /// Begin the receive and send loops. Valid once, from `Created`.
    fn start(&self) -> Result<(), SessionError>;

    /// Request teardown. Idempotent.
    fn stop(&self);

    /// True once stop was requested or a fatal error occurred
    fn stopped(&self) -> bool;

    /// Queue `data` for transmission.
    ///
    /// Buffers are written in call order. Fails with [`SessionError::Stopped`]
    /// once stopping and [`SessionError::QueueFull`] at capacity.
    fn send(&self, data: Bytes) -> Result<(), SessionError>;

    /// Local address as `ip:port`, or empty if the transport is not open
    fn local_endpoint(&self) -> String;

    /// Remote address as `ip:port`, or empty if the transport is not open
    fn remote_endpoint(&self) -> String;
}

/// Application callbacks for a session.
///
/// Both methods run on the session's driver task. They must not block for long
/// and must not wait for the session to close.
pub trait SessionHandler: Send + Sync + 'static {
    /// A complete frame arrived. `frame` is only valid for the duration of the call.
    fn on_receive(&self, id: SessionId, kind: i32, frame: &[u8]);

    /// The session closed. Called exactly once per started or stopped session.
    fn on_disconnect(&self, id: SessionId, reason: &DisconnectReason);
}

/// [`SessionHandler`] built from two closures
pub struct FnHandler<R, D> {
    on_receive: R,
    on_disconnect: D,
}

/// Build a [`SessionHandler`] from a receive closure and a disconnect closure
pub fn handler_fn<R, D>(on_receive: R, on_disconnect: D) -> FnHandler<R, D>
where
    R: Fn(SessionId, i32, &[u8]) + Send + Sync + 'static,
    D: Fn(SessionId, &DisconnectReason) + Send + Sync + 'static,
{
    FnHandler {
        on_receive,
        on_disconnect,
    }
}

impl<R, D> SessionHandler for FnHandler<R, D>
where
    R: Fn(SessionId, i32, &[u8]) + Send + Sync + 'static,
    D: Fn(SessionId, &DisconnectReason) + Send + Sync + 'static,
{
    fn on_receive(&self, id: SessionId, kind: i32, frame: &[u8]) {
        (self.on_receive)(id, kind, frame)
    }

    fn on_disconnect(&self, id: SessionId, reason: &DisconnectReason) {
        (self.on_disconnect)(id, reason)
    }
}

/// Per-session deadlines, heartbeat, and flow control.
///
/// A zero duration disables the corresponding deadline or the heartbeat.
/// A zero queue capacity means unbounded.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Max wait for a read to complete
    pub recv_timeout: Duration,
    /// Max wait for a queued buffer to be written
    pub send_timeout: Duration,
    /// Idle time on the send side before the heartbeat payload is queued
    pub heartbeat_interval: Duration,
    /// Bytes sent as the heartbeat; empty disables heartbeats
    pub heartbeat_payload: Bytes,
    /// Max buffers waiting in the send queue
    pub send_queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_payload: Bytes::new(),
            send_queue_capacity: 0,
        }
    }
}

impl SessionOptions {
    /// Whether the heartbeat will ever fire
    pub fn heartbeat_enabled(&self) -> bool {
        !self.heartbeat_interval.is_zero() && !self.heartbeat_payload.is_empty()
    }
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent, heartbeats included
    pub bytes_out: u64,
    /// Timestamp of last received frame
    pub last_frame_in: Option<Instant>,
    /// Timestamp of last completed write
    pub last_frame_out: Option<Instant>,
    /// Number of frames delivered to the handler
    pub frames_received: u64,
    /// Number of buffers written
    pub frames_sent: u64,
    /// Number of heartbeats queued
    pub heartbeats_sent: u64,
}

impl SessionStats {
    /// Record bytes read from the transport
    pub(crate) fn record_read(&mut self, n: usize) {
        self.bytes_in += n as u64;
    }

    /// Record one frame delivered to the handler
    pub(crate) fn record_frame_in(&mut self) {
        self.frames_received += 1;
        self.last_frame_in = Some(Instant::now());
    }

    /// Record one buffer written to the transport
    pub(crate) fn record_write(&mut self, n: usize) {
        self.bytes_out += n as u64;
        self.frames_sent += 1;
        self.last_frame_out = Some(Instant::now());
    }
}
