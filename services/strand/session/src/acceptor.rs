//! TCP acceptor handing each accepted connection to a caller-supplied factory.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Pause after a failed accept (e.g. out of file descriptors) before retrying
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Listening socket that turns connections into sessions
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    /// Bind a listener on `addr`
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = crate::transport::listen_tcp(addr).await?;
        Ok(Self { listener })
    }

    /// Wrap an existing listener
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever, passing every connection to `on_accept`
    pub async fn run<F>(self, on_accept: F)
    where
        F: FnMut(TcpStream, SocketAddr),
    {
        self.run_until(on_accept, std::future::pending::<()>()).await
    }

    /// Accept until `shutdown` completes
    pub async fn run_until<F, S>(self, mut on_accept: F, shutdown: S)
    where
        F: FnMut(TcpStream, SocketAddr),
        S: Future<Output = ()>,
    {
        match self.listener.local_addr() {
            Ok(addr) => info!("Accepting connections on {}", addr),
            Err(e) => warn!("Accepting connections on unknown address: {}", e),
        }
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    on_accept(stream, peer);
                }
                Err(e) => {
                    warn!("Accept failed: {}; retrying in {:?}", e, ACCEPT_RETRY_DELAY);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }

        info!("Acceptor stopped");
    }
}
