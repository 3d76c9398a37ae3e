//! Outbound client with login payload and automatic reconnect.
//!
//! The client owns at most one live [`SocketSession`] at a time. A background
//! task dials the configured endpoint, queues the login payload ahead of any
//! application data, starts the session, and waits for it to close. With
//! reconnect enabled it then dials again, backing off exponentially while the
//! endpoint is unreachable.

use crate::error::SessionError;
use crate::lock;
use crate::session::{Session, SessionHandler, SessionOptions};
use crate::socket_session::SocketSession;
use crate::transport::{connect_tcp, connect_udp, connect_udp_from, ByteTransport};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strand_wire::PackParser;
use tokio::net::{TcpStream, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by a successful connect
    type Transport: ByteTransport;

    /// Open a transport to `endpoint`
    async fn connect(&self, endpoint: SocketAddr) -> io::Result<Self::Transport>;
}

/// Dials TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpStream;

    async fn connect(&self, endpoint: SocketAddr) -> io::Result<TcpStream> {
        connect_tcp(endpoint).await
    }
}

/// Connects a UDP socket, optionally from a fixed local address
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector {
    /// Local address to bind; ephemeral when `None`
    pub bind: Option<SocketAddr>,
}

#[async_trait]
impl Connector for UdpConnector {
    type Transport = UdpSocket;

    async fn connect(&self, endpoint: SocketAddr) -> io::Result<UdpSocket> {
        match self.bind {
            Some(local) => connect_udp_from(local, endpoint).await,
            None => connect_udp(endpoint).await,
        }
    }
}

/// Client settings
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Endpoint to dial
    pub endpoint: SocketAddr,
    /// Sent first on every new connection; empty sends nothing
    pub login_payload: Bytes,
    /// Dial again after a session closes or a connect fails
    pub reconnect: bool,
    /// Options applied to every session
    pub options: SessionOptions,
    /// First delay after a failed connect
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff
    pub max_backoff: Duration,
}

impl ClientConfig {
    /// Defaults for `endpoint`: reconnect on, backoff from 1s up to 30s
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            login_payload: Bytes::new(),
            reconnect: true,
            options: SessionOptions::default(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Outbound session owner
pub struct Client<C: Connector> {
    inner: Arc<ClientInner<C>>,
}

struct ClientInner<C: Connector> {
    config: ClientConfig,
    connector: C,
    parser: Arc<dyn PackParser>,
    handler: Arc<dyn SessionHandler>,
    current: Mutex<Option<Arc<SocketSession<C::Transport>>>>,
    running: AtomicBool,
    closed: AtomicBool,
    close_signal: Notify,
    next_id: AtomicU64,
}

impl<C: Connector> Client<C> {
    /// Create a client. Nothing is dialed until [`connect`](Self::connect).
    pub fn new(
        config: ClientConfig,
        connector: C,
        parser: Arc<dyn PackParser>,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                parser,
                handler,
                current: Mutex::new(None),
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_signal: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start dialing in the background
    pub fn connect(&self) -> Result<(), SessionError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(SessionError::Stopped);
        }
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyStarted);
        }
        runtime.spawn(self.inner.clone().run());
        Ok(())
    }

    /// Stop the live session. With reconnect enabled a new one is dialed.
    pub fn disconnect(&self) {
        if let Some(session) = self.current() {
            session.stop();
        }
    }

    /// Stop the live session and never dial again
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!("Closing client for {}", self.inner.config.endpoint);
        }
        self.inner.close_signal.notify_one();
        self.disconnect();
    }

    /// Queue `data` on the live session
    pub fn send(&self, data: Bytes) -> Result<(), SessionError> {
        self.current().ok_or(SessionError::NotConnected)?.send(data)
    }

    /// Whether a session is live
    pub fn is_connected(&self) -> bool {
        self.current().is_some_and(|session| !session.stopped())
    }

    /// Whether the background task is still dialing or connected
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The live session, if any
    pub fn current(&self) -> Option<Arc<SocketSession<C::Transport>>> {
        lock(&self.inner.current).clone()
    }

    /// Configured endpoint
    pub fn endpoint(&self) -> SocketAddr {
        self.inner.config.endpoint
    }
}

impl<C: Connector> Drop for Client<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: Connector> ClientInner<C> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn run(self: Arc<Self>) {
        let endpoint = self.config.endpoint;
        let mut backoff = self.config.initial_backoff;

        while !self.is_closed() {
            info!("Attempting to connect to {}", endpoint);

            let attempt = tokio::select! {
                _ = self.close_signal.notified() => break,
                attempt = self.connector.connect(endpoint) => attempt,
            };

            let delay = match attempt {
                Ok(transport) => {
                    info!("Connected to {}", endpoint);
                    backoff = self.config.initial_backoff;
                    match self.open_session(transport) {
                        Ok(session) => {
                            session.closed().await;
                            lock(&self.current).take();
                        }
                        Err(e) => error!("Failed to open session to {}: {}", endpoint, e),
                    }
                    self.config.initial_backoff
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to {}: {}; retrying in {:?}",
                        endpoint, e, backoff
                    );
                    let delay = backoff;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    delay
                }
            };

            if !self.config.reconnect || self.is_closed() {
                break;
            }
            tokio::select! {
                _ = self.close_signal.notified() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.running.store(false, Ordering::Release);
        info!("Client for {} stopped", endpoint);
    }

    fn open_session(
        &self,
        transport: C::Transport,
    ) -> Result<Arc<SocketSession<C::Transport>>, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(SocketSession::new(
            id,
            transport,
            self.parser.clone(),
            self.handler.clone(),
        ));
        session.set_options(self.config.options.clone())?;
        if !self.config.login_payload.is_empty() {
            session.send(self.config.login_payload.clone())?;
        }
        session.start()?;

        *lock(&self.current) = Some(session.clone());
        // close() may have run before the session was visible to it
        if self.is_closed() {
            session.stop();
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DisconnectReason;
    use crate::session::{handler_fn, SessionId};
    use crate::transport::listen_tcp;
    use std::net::{IpAddr, Ipv4Addr};
    use strand_wire::DigitPrefixed;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn quiet_handler() -> Arc<dyn SessionHandler> {
        Arc::new(handler_fn(
            |_: SessionId, _: i32, _: &[u8]| {},
            |_: SessionId, _: &DisconnectReason| {},
        ))
    }

    fn test_config(endpoint: SocketAddr) -> ClientConfig {
        ClientConfig {
            login_payload: Bytes::from_static(b"5login"),
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
            ..ClientConfig::new(endpoint)
        }
    }

    async fn read_login(listener: &TcpListener) -> TcpStream {
        let (mut stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut buf = [0u8; 6];
        timeout(WAIT, stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"5login");
        stream
    }

    #[tokio::test]
    async fn test_login_first_and_reconnect() {
        let listener = listen_tcp(localhost()).await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        let client = Client::new(
            test_config(endpoint),
            TcpConnector,
            Arc::new(DigitPrefixed),
            quiet_handler(),
        );

        client.connect().unwrap();
        let first = read_login(&listener).await;
        drop(first);

        // Server hung up; the client dials again and logs in again
        let mut second = read_login(&listener).await;
        timeout(WAIT, async {
            while !client.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        client.send(Bytes::from_static(b"2hi")).unwrap();
        let mut buf = [0u8; 3];
        timeout(WAIT, second.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"2hi");

        client.close();
        timeout(WAIT, async {
            while client.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let client = Client::new(
            ClientConfig::new(localhost()),
            TcpConnector,
            Arc::new(DigitPrefixed),
            quiet_handler(),
        );
        assert!(matches!(
            client.send(Bytes::from_static(b"1a")),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_twice_and_after_close() {
        let listener = listen_tcp(localhost()).await.unwrap();
        let client = Client::new(
            test_config(listener.local_addr().unwrap()),
            TcpConnector,
            Arc::new(DigitPrefixed),
            quiet_handler(),
        );

        client.connect().unwrap();
        assert!(matches!(client.connect(), Err(SessionError::AlreadyStarted)));

        client.close();
        assert!(matches!(client.connect(), Err(SessionError::Stopped)));
    }

    #[tokio::test]
    async fn test_no_reconnect_stops_after_first_session() {
        let listener = listen_tcp(localhost()).await.unwrap();
        let config = ClientConfig {
            reconnect: false,
            ..test_config(listener.local_addr().unwrap())
        };
        let client = Client::new(config, TcpConnector, Arc::new(DigitPrefixed), quiet_handler());

        client.connect().unwrap();
        drop(read_login(&listener).await);

        timeout(WAIT, async {
            while client.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(client.current().is_none());
    }

    #[tokio::test]
    async fn test_backoff_while_unreachable() {
        // Grab a free port, then close it so connects are refused
        let endpoint = {
            let listener = listen_tcp(localhost()).await.unwrap();
            listener.local_addr().unwrap()
        };
        let client = Client::new(
            test_config(endpoint),
            TcpConnector,
            Arc::new(DigitPrefixed),
            quiet_handler(),
        );

        client.connect().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(client.is_running());
        assert!(!client.is_connected());

        client.close();
        timeout(WAIT, async {
            while client.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
