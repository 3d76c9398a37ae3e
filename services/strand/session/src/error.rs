//! Session error types and disconnect reasons.

use crate::session::SessionId;
use std::fmt;
use std::io;
use thiserror::Error;

/// Numeric codes reported alongside errors and disconnect reasons.
///
/// Codes sit just above a fixed origin so they never collide with OS error
/// numbers or with the `0` success code callers tend to use.
pub mod code {
    /// Origin all codes are offset from
    pub const ORIGIN: i32 = -65536;
    /// Send queue at capacity
    pub const QUEUE_FULL: i32 = ORIGIN + 1;
    /// Not enough bytes for one packet
    pub const PACKET_INCOMPLETE: i32 = ORIGIN + 2;
    /// Bytes can never form a valid packet
    pub const PACKET_CORRUPT: i32 = ORIGIN + 3;
    /// Registry at capacity
    pub const SESSION_FULL: i32 = ORIGIN + 4;
    /// Session stopped or stopping
    pub const SESSION_STOPPED: i32 = ORIGIN + 5;
    /// No session with that id
    pub const SESSION_NOT_EXIST: i32 = ORIGIN + 6;
    /// Send queue has nothing to drain
    pub const QUEUE_EMPTY: i32 = ORIGIN + 7;
    /// Deadline expired with an operation outstanding
    pub const TIMEOUT: i32 = ORIGIN + 8;
    /// Transport read or write failed
    pub const TRANSPORT: i32 = ORIGIN + 9;
    /// Peer closed the connection
    pub const PEER_CLOSED: i32 = ORIGIN + 10;
    /// Lifecycle call made in the wrong state
    pub const INVALID_STATE: i32 = ORIGIN + 11;
}

/// I/O direction of a deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Reading from the transport
    Receive,
    /// Writing to the transport
    Send,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Receive => write!(f, "receive"),
            Direction::Send => write!(f, "send"),
        }
    }
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Send queue is at its configured capacity
    #[error("send queue full")]
    QueueFull,

    /// Send queue is empty
    #[error("send queue empty")]
    QueueEmpty,

    /// Not enough bytes buffered for one packet
    #[error("packet incomplete")]
    PacketIncomplete,

    /// Buffered bytes can never form a valid packet
    #[error("packet corrupt")]
    PacketCorrupt,

    /// Registry is at its configured capacity
    #[error("session registry full")]
    SessionFull,

    /// A session with this id is already registered
    #[error("session {0} already registered")]
    DuplicateSession(SessionId),

    /// No session with this id
    #[error("session {0} does not exist")]
    SessionNotExist(SessionId),

    /// Session is stopping or stopped and accepts no more work
    #[error("session stopped")]
    Stopped,

    /// `start` was called on a session that is already running
    #[error("session already started")]
    AlreadyStarted,

    /// Client has no live session
    #[error("not connected")]
    NotConnected,

    /// `start` was called outside a tokio runtime
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Deadline expired with an operation outstanding
    #[error("{0} timed out")]
    Timeout(Direction),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl SessionError {
    /// Numeric code for this error
    pub fn code(&self) -> i32 {
        match self {
            SessionError::QueueFull => code::QUEUE_FULL,
            SessionError::QueueEmpty => code::QUEUE_EMPTY,
            SessionError::PacketIncomplete => code::PACKET_INCOMPLETE,
            SessionError::PacketCorrupt => code::PACKET_CORRUPT,
            SessionError::SessionFull | SessionError::DuplicateSession(_) => code::SESSION_FULL,
            SessionError::SessionNotExist(_) => code::SESSION_NOT_EXIST,
            SessionError::Stopped => code::SESSION_STOPPED,
            SessionError::AlreadyStarted | SessionError::NotConnected | SessionError::NoRuntime => {
                code::INVALID_STATE
            }
            SessionError::Timeout(_) => code::TIMEOUT,
            SessionError::Transport(_) => code::TRANSPORT,
        }
    }

    /// Whether the caller can retry later (flow control rather than failure)
    pub fn is_flow_control(&self) -> bool {
        matches!(self, SessionError::QueueFull | SessionError::QueueEmpty)
    }
}

/// Why a session closed. Reported exactly once through the disconnect callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `stop()` was called
    #[error("stopped")]
    Stopped,

    /// Peer closed the connection (read returned EOF)
    #[error("peer closed the connection")]
    PeerClosed,

    /// Parser reported bytes that can never form a frame
    #[error("corrupt packet")]
    PacketCorrupt,

    /// A deadline expired with its operation outstanding
    #[error("{0} timeout")]
    Timeout(Direction),

    /// Transport read or write failed
    #[error("transport error: {message}")]
    Transport {
        /// Error kind reported by the transport
        kind: io::ErrorKind,
        /// Error text reported by the transport
        message: String,
    },
}

impl DisconnectReason {
    /// Numeric code for this reason
    pub fn code(&self) -> i32 {
        match self {
            DisconnectReason::Stopped => code::SESSION_STOPPED,
            DisconnectReason::PeerClosed => code::PEER_CLOSED,
            DisconnectReason::PacketCorrupt => code::PACKET_CORRUPT,
            DisconnectReason::Timeout(_) => code::TIMEOUT,
            DisconnectReason::Transport { .. } => code::TRANSPORT,
        }
    }

    /// Whether the session ended for any reason other than a local `stop()`
    pub fn is_error(&self) -> bool {
        !matches!(self, DisconnectReason::Stopped)
    }
}

impl From<io::Error> for DisconnectReason {
    fn from(err: io::Error) -> Self {
        DisconnectReason::Transport {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
