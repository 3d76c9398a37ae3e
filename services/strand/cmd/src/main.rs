//! Strand node binary.
//!
//! Runs either an echo server that accepts TCP connections and sends every
//! frame back to its sender, or a line client that frames stdin lines onto one
//! connection and prints the frames it receives.

use anyhow::{bail, Result};
use clap::Parser;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use strand_session::{
    Acceptor, Client, ClientConfig, Connector, DisconnectReason, Session, SessionHandler,
    SessionId, SessionOptions, SessionRegistry, SocketSession, TcpConnector, UdpConnector,
};
use strand_wire::PackParser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::{Framing, StrandConfig};
use logging::StrandLogFormatter;

/// How long shutdown waits for sessions to finish teardown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Streaming session node
#[derive(Parser, Debug)]
#[command(name = "strand", version, about = "Streaming session node: echo server or line client")]
struct Args {
    /// Listen address, e.g. 0.0.0.0:9000
    #[arg(long, conflicts_with = "connect")]
    listen: Option<SocketAddr>,

    /// Connect to address, e.g. 127.0.0.1:9000
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Dial over UDP instead of TCP (client mode)
    #[arg(long)]
    udp: bool,

    /// Frame layout
    #[arg(long, value_enum)]
    framing: Option<Framing>,

    /// Receive timeout, e.g. 30s (0s disables)
    #[arg(long)]
    recv_timeout: Option<humantime::Duration>,

    /// Send timeout, e.g. 30s (0s disables)
    #[arg(long)]
    send_timeout: Option<humantime::Duration>,

    /// Heartbeat interval, e.g. 10s (0s disables)
    #[arg(long)]
    heartbeat_interval: Option<humantime::Duration>,

    /// Heartbeat text sent when the link is idle
    #[arg(long)]
    heartbeat_payload: Option<String>,

    /// Send queue capacity (0 = unbounded)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Maximum concurrent sessions in server mode (0 = unbounded)
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Login text sent first on every client connection
    #[arg(long)]
    login: Option<String>,

    /// Do not reconnect after the client connection drops
    #[arg(long)]
    no_reconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "strand.yaml")]
    config: PathBuf,
}

impl Args {
    /// Flags given on the command line win over file and environment
    fn apply_to(&self, config: &mut StrandConfig) {
        if self.listen.is_some() {
            config.listen = self.listen;
            config.connect = None;
        }
        if self.connect.is_some() {
            config.connect = self.connect;
            config.listen = None;
        }
        if self.udp {
            config.udp = true;
        }
        if let Some(framing) = self.framing {
            config.framing = framing;
        }
        if let Some(timeout) = self.recv_timeout {
            config.recv_timeout = timeout.into();
        }
        if let Some(timeout) = self.send_timeout {
            config.send_timeout = timeout.into();
        }
        if let Some(interval) = self.heartbeat_interval {
            config.heartbeat_interval = interval.into();
        }
        if let Some(payload) = &self.heartbeat_payload {
            config.heartbeat_payload = payload.clone();
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(max_sessions) = self.max_sessions {
            config.max_sessions = max_sessions;
        }
        if let Some(login) = &self.login {
            config.login = login.clone();
        }
        if self.no_reconnect {
            config.reconnect = false;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("strand={}", args.log_level).parse()?)
        .add_directive(format!("strand_session={}", args.log_level).parse()?)
        .add_directive(format!("strand_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(StrandLogFormatter::new("strand".to_string()))
        .init();

    info!("Starting strand v{}", env!("CARGO_PKG_VERSION"));

    let mut config = StrandConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    };

    match (config.listen, config.connect) {
        (Some(addr), _) => run_server(addr, &config, shutdown).await,
        (None, Some(endpoint)) => {
            let client_config = config.client_config(endpoint)?;
            if config.udp {
                run_client(UdpConnector::default(), client_config, config.framing, shutdown).await
            } else {
                run_client(TcpConnector, client_config, config.framing, shutdown).await
            }
        }
        (None, None) => bail!("either --listen or --connect is required"),
    }
}

/// Sends every received frame back to the session it came from
struct EchoHandler {
    registry: Weak<SessionRegistry>,
    framing: Framing,
}

impl SessionHandler for EchoHandler {
    fn on_receive(&self, id: SessionId, kind: i32, frame: &[u8]) {
        if frame.is_empty() {
            debug!(session = id, "Heartbeat (kind {})", kind);
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let echoed = self
            .framing
            .encode(frame)
            .map_err(|e| e.to_string())
            .and_then(|data| registry.send(id, data).map_err(|e| e.to_string()));
        if let Err(e) = echoed {
            warn!(session = id, "Echo of {} bytes failed: {}", frame.len(), e);
        }
    }

    fn on_disconnect(&self, id: SessionId, reason: &DisconnectReason) {
        info!(session = id, "Disconnected: {} (code {})", reason, reason.code());
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.remove(id);
        }
    }
}

async fn run_server(
    addr: SocketAddr,
    config: &StrandConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let options = config.session_options()?;
    let parser = config.framing.parser();
    let registry = Arc::new(SessionRegistry::new(config.max_sessions));
    let handler: Arc<dyn SessionHandler> = Arc::new(EchoHandler {
        registry: Arc::downgrade(&registry),
        framing: config.framing,
    });

    let acceptor = Acceptor::bind(addr).await?;
    info!("Echo server listening on {}", acceptor.local_addr()?);

    acceptor
        .run_until(
            |stream, peer| {
                open_server_session(&registry, stream, peer, &parser, &handler, &options)
            },
            shutdown,
        )
        .await;

    registry.stop_all();
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("{} sessions still closing at exit", registry.len());
    }

    info!("Echo server stopped");
    Ok(())
}

fn open_server_session(
    registry: &SessionRegistry,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    parser: &Arc<dyn PackParser>,
    handler: &Arc<dyn SessionHandler>,
    options: &SessionOptions,
) {
    let id = registry.next_id();
    let session = Arc::new(SocketSession::new(id, stream, parser.clone(), handler.clone()));
    if let Err(e) = session.set_options(options.clone()) {
        warn!(session = id, "Rejecting {}: {}", peer, e);
        return;
    }
    if let Err(e) = registry.insert(session.clone()) {
        warn!(session = id, "Rejecting {}: {}", peer, e);
        return;
    }
    if let Err(e) = session.start() {
        warn!(session = id, "Failed to start session for {}: {}", peer, e);
        let _ = registry.remove(id);
        return;
    }
    info!(session = id, "Accepted {}", peer);
}

/// Prints every received frame on stdout
struct PrintHandler;

impl SessionHandler for PrintHandler {
    fn on_receive(&self, id: SessionId, kind: i32, frame: &[u8]) {
        if frame.is_empty() {
            debug!(session = id, "Heartbeat (kind {})", kind);
            return;
        }
        println!("{}", String::from_utf8_lossy(frame));
    }

    fn on_disconnect(&self, id: SessionId, reason: &DisconnectReason) {
        info!(session = id, "Disconnected: {} (code {})", reason, reason.code());
    }
}

async fn run_client<C: Connector>(
    connector: C,
    config: ClientConfig,
    framing: Framing,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let endpoint = config.endpoint;
    let client = Client::new(config, connector, framing.parser(), Arc::new(PrintHandler));
    client.connect()?;
    info!("Client dialing {}; type lines to send them", endpoint);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("stdin closed");
            break;
        };
        if line.is_empty() {
            continue;
        }

        match framing.encode(line.as_bytes()) {
            Ok(data) => {
                if let Err(e) = client.send(data) {
                    warn!("Dropped line: {}", e);
                }
            }
            Err(e) => warn!("Dropped line: {}", e),
        }
    }

    client.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "strand",
            "--connect",
            "127.0.0.1:9000",
            "--recv-timeout",
            "5s",
            "--heartbeat-payload",
            "hb",
            "--queue-capacity",
            "8",
            "--framing",
            "length",
            "--no-reconnect",
        ]);

        let mut config = StrandConfig {
            listen: Some("0.0.0.0:1".parse().unwrap()),
            ..Default::default()
        };
        args.apply_to(&mut config);

        assert_eq!(config.listen, None);
        assert_eq!(config.connect, Some("127.0.0.1:9000".parse().unwrap()));
        assert_eq!(config.recv_timeout, Duration::from_secs(5));
        assert_eq!(config.send_timeout, Duration::from_secs(30));
        assert_eq!(config.heartbeat_payload, "hb");
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.framing, Framing::Length);
        assert!(!config.reconnect);
    }

    #[test]
    fn test_listen_and_connect_conflict() {
        let parsed = Args::try_parse_from([
            "strand",
            "--listen",
            "0.0.0.0:9000",
            "--connect",
            "127.0.0.1:9000",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_echo_server_round_trip() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let config = StrandConfig::default();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            run_server(addr, &config, async move {
                let _ = stop_rx.await;
            })
            .await
        });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = tokio::net::TcpStream::connect(addr).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut stream = stream.expect("server did not come up");

        stream.write_all(b"5hello").await.unwrap();
        let mut buf = [0u8; 6];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"5hello");

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
