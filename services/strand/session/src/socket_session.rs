//! Socket-backed session engine.
//!
//! Each started session runs one driver task. The driver races three futures:
//!
//! ```text
//!                 +-------------------+
//!  stop() ------> |  state watch      |---+
//!                 +-------------------+   |
//!                 +-------------------+   |   first to finish
//!  transport ---> |  receive loop     |---+-----------------> teardown
//!                 +-------------------+   |                   (exactly once)
//!                 +-------------------+   |
//!  send() ------> |  send loop        |---+
//!   (queue)       +-------------------+
//! ```
//!
//! The receive loop reads into the session's buffer, then asks the parser for
//! frames until it reports incomplete. The send loop drains the queue one
//! buffer at a time and queues the heartbeat payload when it has been idle for
//! a full heartbeat interval. Whichever of them returns first names the
//! disconnect reason; dropping the others cancels their outstanding I/O.

use crate::deadline::Deadline;
use crate::error::{Direction, DisconnectReason, SessionError};
use crate::lock;
use crate::queue::SendQueue;
use crate::session::{Session, SessionHandler, SessionId, SessionOptions, SessionState, SessionStats};
use crate::transport::ByteTransport;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use strand_wire::{FrameBuffer, PackParser, Packet, ParseOutcome, RecvBuffer};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, trace, warn};

/// Session driven over a [`ByteTransport`].
///
/// Generic over the receive buffer so callers can plug in their own storage;
/// [`FrameBuffer`] is the default.
pub struct SocketSession<T: ByteTransport, B: RecvBuffer = FrameBuffer> {
    shared: Arc<Shared<T>>,
    /// Handed to the driver at start
    buffer: Mutex<Option<B>>,
}

/// State shared between the handle and the driver task
struct Shared<T> {
    id: SessionId,
    parser: Arc<dyn PackParser>,
    handler: Arc<dyn SessionHandler>,
    /// `None` once the transport has been released
    transport: Mutex<Option<Arc<T>>>,
    options: Mutex<SessionOptions>,
    queue: Mutex<SendQueue>,
    queue_ready: Notify,
    state: watch::Sender<SessionState>,
    stats: Mutex<SessionStats>,
}

impl<T: ByteTransport> SocketSession<T> {
    /// Create a session over `transport` with a default [`FrameBuffer`]
    pub fn new(
        id: SessionId,
        transport: T,
        parser: Arc<dyn PackParser>,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        Self::with_buffer(id, transport, parser, handler, FrameBuffer::new())
    }
}

impl<T: ByteTransport, B: RecvBuffer> SocketSession<T, B> {
    /// Create a session over `transport` receiving into `buffer`
    pub fn with_buffer(
        id: SessionId,
        transport: T,
        parser: Arc<dyn PackParser>,
        handler: Arc<dyn SessionHandler>,
        buffer: B,
    ) -> Self {
        let options = SessionOptions::default();
        let queue = SendQueue::new(options.send_queue_capacity);
        let (state, _) = watch::channel(SessionState::Created);

        Self {
            shared: Arc::new(Shared {
                id,
                parser,
                handler,
                transport: Mutex::new(Some(Arc::new(transport))),
                options: Mutex::new(options),
                queue: Mutex::new(queue),
                queue_ready: Notify::new(),
                state,
                stats: Mutex::new(SessionStats::default()),
            }),
            buffer: Mutex::new(Some(buffer)),
        }
    }

    /// Replace deadlines, heartbeat, and queue capacity. Only valid before start.
    pub fn set_options(&self, options: SessionOptions) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Created => {}
            SessionState::Active => return Err(SessionError::AlreadyStarted),
            SessionState::Closing | SessionState::Closed => return Err(SessionError::Stopped),
        }
        lock(&self.shared.queue).set_capacity(options.send_queue_capacity);
        *lock(&self.shared.options) = options;
        Ok(())
    }

    /// Current options
    pub fn options(&self) -> SessionOptions {
        lock(&self.shared.options).clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Number of buffers waiting to be written
    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Snapshot of session statistics
    pub fn stats(&self) -> SessionStats {
        lock(&self.shared.stats).clone()
    }

    /// Local address, if the transport is still open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.with_transport(|t| t.local_addr())
    }

    /// Remote address, if the transport is still open
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.with_transport(|t| t.peer_addr())
    }

    /// Wait until teardown has completed
    pub async fn closed(&self) {
        let mut state_rx = self.shared.state.subscribe();
        loop {
            let closed = *state_rx.borrow_and_update() == SessionState::Closed;
            if closed || state_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl<T: ByteTransport, B: RecvBuffer> Session for SocketSession<T, B> {
    fn id(&self) -> SessionId {
        self.shared.id
    }

    fn start(&self) -> Result<(), SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let mut outcome = Ok(());
        self.shared.state.send_if_modified(|state| match *state {
            SessionState::Created => {
                *state = SessionState::Active;
                true
            }
            SessionState::Active => {
                outcome = Err(SessionError::AlreadyStarted);
                false
            }
            SessionState::Closing | SessionState::Closed => {
                outcome = Err(SessionError::Stopped);
                false
            }
        });
        outcome?;

        let transport = lock(&self.shared.transport).clone();
        let buffer = lock(&self.buffer).take();
        let (Some(transport), Some(buffer)) = (transport, buffer) else {
            self.shared.teardown(DisconnectReason::Stopped, None);
            return Err(SessionError::Stopped);
        };

        info!(
            "Session {} started ({} -> {})",
            self.shared.id,
            self.local_endpoint(),
            self.remote_endpoint()
        );
        runtime.spawn(self.shared.clone().drive(transport, buffer));
        Ok(())
    }

    fn stop(&self) {
        let mut never_started = false;
        let changed = self.shared.state.send_if_modified(|state| match *state {
            SessionState::Created => {
                *state = SessionState::Closing;
                never_started = true;
                true
            }
            SessionState::Active => {
                *state = SessionState::Closing;
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        });

        if changed {
            debug!("Session {} stop requested", self.shared.id);
        }
        if never_started {
            let transport = lock(&self.shared.transport).clone();
            self.shared.teardown(DisconnectReason::Stopped, transport);
        }
    }

    fn stopped(&self) -> bool {
        self.state().is_stopped()
    }

    fn send(&self, data: Bytes) -> Result<(), SessionError> {
        {
            let mut queue = lock(&self.shared.queue);
            if self.stopped() {
                return Err(SessionError::Stopped);
            }
            if let Err(e) = queue.push(data) {
                debug!(
                    "Session {} send queue full ({} buffers)",
                    self.shared.id,
                    queue.len()
                );
                return Err(e);
            }
        }
        self.shared.queue_ready.notify_one();
        Ok(())
    }

    fn local_endpoint(&self) -> String {
        self.local_addr().map(|a| a.to_string()).unwrap_or_default()
    }

    fn remote_endpoint(&self) -> String {
        self.peer_addr().map(|a| a.to_string()).unwrap_or_default()
    }
}

impl<T: ByteTransport> Shared<T> {
    fn with_transport(&self, f: impl FnOnce(&T) -> std::io::Result<SocketAddr>) -> Option<SocketAddr> {
        let transport = lock(&self.transport).clone()?;
        f(&transport).ok()
    }

    fn is_stopping(&self) -> bool {
        self.state.borrow().is_stopped()
    }

    /// Driver task: run until the first loop ends or stop is requested, then tear down
    async fn drive<B: RecvBuffer>(self: Arc<Self>, transport: Arc<T>, buffer: B) {
        let options = lock(&self.options).clone();
        let stop_rx = self.state.subscribe();

        let reason = tokio::select! {
            biased;
            _ = stop_requested(stop_rx) => DisconnectReason::Stopped,
            reason = self.recv_loop(&*transport, buffer, &options) => reason,
            reason = self.send_loop(&*transport, &options) => reason,
        };

        self.teardown(reason, Some(transport));
    }

    async fn recv_loop<B: RecvBuffer>(
        &self,
        transport: &T,
        mut buffer: B,
        options: &SessionOptions,
    ) -> DisconnectReason {
        let mut deadline = Deadline::new();
        let min_read = transport.min_read_size();

        loop {
            buffer.reserve(min_read);
            deadline.arm(options.recv_timeout);
            let read = tokio::select! {
                read = transport.read_some(buffer.writable()) => read,
                _ = deadline.elapsed() => {
                    warn!(
                        "Session {} receive timed out after {:?}",
                        self.id, options.recv_timeout
                    );
                    return DisconnectReason::Timeout(Direction::Receive);
                }
            };
            deadline.reset();

            let n = match read {
                Ok(0) => {
                    debug!("Session {} peer closed the connection", self.id);
                    return DisconnectReason::PeerClosed;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("Session {} read error: {}", self.id, e);
                    return e.into();
                }
            };

            buffer.commit(n);
            lock(&self.stats).record_read(n);
            trace!(
                "Session {} read {} bytes, {} buffered",
                self.id,
                n,
                buffer.data().len()
            );

            if let Err(reason) = self.dispatch(&mut buffer) {
                return reason;
            }
        }
    }

    /// Deliver every complete frame at the front of the buffer
    fn dispatch<B: RecvBuffer>(&self, buffer: &mut B) -> Result<(), DisconnectReason> {
        loop {
            // Frames left behind are dropped with the buffer at teardown
            if self.is_stopping() {
                return Ok(());
            }

            match self.next_packet(buffer.data()) {
                Ok(packet) => {
                    self.handler
                        .on_receive(self.id, packet.kind, packet.body(buffer.data()));
                    buffer.consume(packet.len);
                    lock(&self.stats).record_frame_in();
                }
                Err(SessionError::PacketIncomplete) => return Ok(()),
                Err(_) => {
                    warn!(
                        "Session {} received a corrupt packet ({} bytes buffered), closing",
                        self.id,
                        buffer.data().len()
                    );
                    return Err(DisconnectReason::PacketCorrupt);
                }
            }
        }
    }

    fn next_packet(&self, data: &[u8]) -> Result<Packet, SessionError> {
        match self.parser.parse(data) {
            ParseOutcome::Incomplete => Err(SessionError::PacketIncomplete),
            ParseOutcome::Corrupt => Err(SessionError::PacketCorrupt),
            ParseOutcome::Complete(packet) if packet.fits(data.len()) => Ok(packet),
            ParseOutcome::Complete(packet) => {
                warn!(
                    "Session {} parser reported {:?} over {} buffered bytes",
                    self.id,
                    packet,
                    data.len()
                );
                Err(SessionError::PacketCorrupt)
            }
        }
    }

    async fn send_loop(&self, transport: &T, options: &SessionOptions) -> DisconnectReason {
        let mut deadline = Deadline::new();
        let mut heartbeat = Deadline::new();

        loop {
            let next = lock(&self.queue).pop();
            let data = match next {
                Ok(data) => data,
                Err(_) => {
                    if options.heartbeat_enabled() {
                        heartbeat.arm(options.heartbeat_interval);
                    }
                    tokio::select! {
                        _ = self.queue_ready.notified() => {}
                        _ = heartbeat.elapsed() => self.queue_heartbeat(&options.heartbeat_payload),
                    }
                    heartbeat.reset();
                    continue;
                }
            };

            deadline.arm(options.send_timeout);
            let written = tokio::select! {
                written = transport.write_all(&data) => written,
                _ = deadline.elapsed() => {
                    warn!(
                        "Session {} send timed out after {:?}",
                        self.id, options.send_timeout
                    );
                    return DisconnectReason::Timeout(Direction::Send);
                }
            };
            deadline.reset();

            if let Err(e) = written {
                error!("Session {} write error: {}", self.id, e);
                return e.into();
            }
            lock(&self.stats).record_write(data.len());
            trace!("Session {} wrote {} bytes", self.id, data.len());
        }
    }

    fn queue_heartbeat(&self, payload: &Bytes) {
        let queued = lock(&self.queue).push(payload.clone());
        match queued {
            Ok(()) => {
                lock(&self.stats).heartbeats_sent += 1;
                debug!("Session {} queued heartbeat", self.id);
            }
            // Application data raced in; the link is not idle after all
            Err(_) => trace!("Session {} skipped heartbeat, queue full", self.id),
        }
    }

    /// Mark closing, drop queued data, notify the handler, release the transport.
    ///
    /// Callers guarantee this runs once per session: from the driver task, or
    /// from `stop()` on a session that never started.
    fn teardown(&self, reason: DisconnectReason, transport: Option<Arc<T>>) {
        self.state.send_if_modified(|state| {
            if state.is_stopped() {
                false
            } else {
                *state = SessionState::Closing;
                true
            }
        });

        let dropped = lock(&self.queue).clear();
        if dropped > 0 {
            debug!("Session {} discarded {} queued buffers", self.id, dropped);
        }

        if reason.is_error() {
            warn!("Session {} disconnected: {}", self.id, reason);
        } else {
            info!("Session {} stopped", self.id);
        }
        self.handler.on_disconnect(self.id, &reason);

        lock(&self.transport).take();
        drop(transport);

        let stats = lock(&self.stats).clone();
        info!(
            "Session {} closed: {} bytes in, {} bytes out, {} frames in, {} frames out",
            self.id, stats.bytes_in, stats.bytes_out, stats.frames_received, stats.frames_sent
        );
        self.state.send_replace(SessionState::Closed);
    }
}

/// Complete once the state reaches `Closing`
async fn stop_requested(mut state_rx: watch::Receiver<SessionState>) {
    loop {
        let stopping = state_rx.borrow_and_update().is_stopped();
        if stopping || state_rx.changed().await.is_err() {
            return;
        }
    }
}
