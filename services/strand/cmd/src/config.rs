//! Configuration handling for the strand node.
//!
//! Settings come from a YAML file (defaults when it is missing or invalid),
//! then `STRAND_*` environment variables, then command-line flags.

use anyhow::Result;
use bytes::Bytes;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strand_session::{ClientConfig, SessionOptions};
use strand_wire::{DigitPrefixed, LengthPrefixed, PackParser, WireError};
use tracing::{info, warn};

/// Frame layout spoken on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One ASCII digit length, then that many bytes
    Digit,
    /// Big-endian u32 length, then that many bytes
    Length,
}

impl Framing {
    /// Parser for this framing
    pub fn parser(self) -> Arc<dyn PackParser> {
        match self {
            Framing::Digit => Arc::new(DigitPrefixed),
            Framing::Length => Arc::new(LengthPrefixed::new()),
        }
    }

    /// Frame `payload`; an empty payload yields an empty buffer
    pub fn encode(self, payload: &[u8]) -> Result<Bytes, WireError> {
        if payload.is_empty() {
            return Ok(Bytes::new());
        }
        match self {
            Framing::Digit => Ok(DigitPrefixed::encode(payload)),
            Framing::Length => LengthPrefixed::new().encode(payload),
        }
    }
}

/// Strand node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrandConfig {
    /// Address to accept connections on (server mode)
    pub listen: Option<SocketAddr>,
    /// Address to dial (client mode)
    pub connect: Option<SocketAddr>,
    /// Dial over UDP instead of TCP
    pub udp: bool,
    /// Frame layout
    pub framing: Framing,
    /// Registry capacity in server mode (0 = unbounded)
    pub max_sessions: usize,
    /// Receive timeout (zero disables)
    pub recv_timeout: Duration,
    /// Send timeout (zero disables)
    pub send_timeout: Duration,
    /// Heartbeat interval (zero disables)
    pub heartbeat_interval: Duration,
    /// Heartbeat text, framed before sending; empty disables
    pub heartbeat_payload: String,
    /// Send queue capacity (0 = unbounded)
    pub queue_capacity: usize,
    /// Login text sent first on every client connection; empty sends nothing
    pub login: String,
    /// Reconnect after the client session closes
    pub reconnect: bool,
}

impl Default for StrandConfig {
    fn default() -> Self {
        Self {
            listen: None,
            connect: None,
            udp: false,
            framing: Framing::Digit,
            max_sessions: 0,
            recv_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_payload: String::new(),
            queue_capacity: 0,
            login: String::new(),
            reconnect: true,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    strand: Option<FileConfig>,
}

/// `strand:` section; every key is optional
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    listen: Option<SocketAddr>,
    connect: Option<SocketAddr>,
    udp: Option<bool>,
    framing: Option<Framing>,
    max_sessions: Option<usize>,
    session: Option<SessionSection>,
    client: Option<ClientSection>,
}

/// Durations are whole seconds
#[derive(Debug, Default, Deserialize)]
struct SessionSection {
    recv_timeout: Option<u64>,
    send_timeout: Option<u64>,
    heartbeat_interval: Option<u64>,
    heartbeat_payload: Option<String>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    login: Option<String>,
    reconnect: Option<bool>,
}

impl StrandConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}: {}; using defaults",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();
        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        let Some(file) = root_config.strand else {
            return;
        };

        if file.listen.is_some() {
            self.listen = file.listen;
        }
        if file.connect.is_some() {
            self.connect = file.connect;
        }
        if let Some(udp) = file.udp {
            self.udp = udp;
        }
        if let Some(framing) = file.framing {
            self.framing = framing;
        }
        if let Some(max_sessions) = file.max_sessions {
            self.max_sessions = max_sessions;
        }

        let session = file.session.unwrap_or_default();
        if let Some(secs) = session.recv_timeout {
            self.recv_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = session.send_timeout {
            self.send_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = session.heartbeat_interval {
            self.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(payload) = session.heartbeat_payload {
            self.heartbeat_payload = payload;
        }
        if let Some(capacity) = session.queue_capacity {
            self.queue_capacity = capacity;
        }

        let client = file.client.unwrap_or_default();
        if let Some(login) = client.login {
            self.login = login;
        }
        if let Some(reconnect) = client.reconnect {
            self.reconnect = reconnect;
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup("STRAND_LISTEN") {
            match listen.parse() {
                Ok(addr) => {
                    self.listen = Some(addr);
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(_) => warn!("Ignoring invalid STRAND_LISTEN {:?}", listen),
            }
        }

        if let Some(connect) = lookup("STRAND_CONNECT") {
            match connect.parse() {
                Ok(addr) => {
                    self.connect = Some(addr);
                    info!("Connect address overridden by environment: {}", addr);
                }
                Err(_) => warn!("Ignoring invalid STRAND_CONNECT {:?}", connect),
            }
        }

        if let Some(capacity) = lookup("STRAND_QUEUE_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                self.queue_capacity = capacity;
                info!("Queue capacity overridden by environment: {}", capacity);
            }
        }

        if let Some(interval) = lookup("STRAND_HEARTBEAT_INTERVAL") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.heartbeat_interval = Duration::from_secs(secs);
                info!("Heartbeat interval overridden by environment: {}s", secs);
            }
        }
    }

    /// Session options derived from this configuration
    pub fn session_options(&self) -> Result<SessionOptions> {
        Ok(SessionOptions {
            recv_timeout: self.recv_timeout,
            send_timeout: self.send_timeout,
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_payload: self.framing.encode(self.heartbeat_payload.as_bytes())?,
            send_queue_capacity: self.queue_capacity,
        })
    }

    /// Client settings for dialing `endpoint`
    pub fn client_config(&self, endpoint: SocketAddr) -> Result<ClientConfig> {
        Ok(ClientConfig {
            login_payload: self.framing.encode(self.login.as_bytes())?,
            reconnect: self.reconnect,
            options: self.session_options()?,
            ..ClientConfig::new(endpoint)
        })
    }
}
