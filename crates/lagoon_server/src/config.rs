//! Gateway configuration types and defaults.
//!
//! The binary crate translates its TOML file into a [`GatewayConfig`]; the
//! defaults here are part of the observable behavioral contract (housekeeping
//! periods, accept poll interval, drain grace).

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::GatewayError;

/// Address family the acceptor listens on, selected from configuration.
///
/// A value parseable as `host:port` is a network endpoint; a value containing
/// a path separator is a filesystem-backed local socket. Anything else is an
/// unrecognized family and fails startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddress {
    /// TCP endpoint, e.g. `127.0.0.1:6969`.
    Tcp(SocketAddr),
    /// Unix domain socket path, e.g. `/tmp/lagoon.sock`.
    Unix(PathBuf),
}

impl ListenAddress {
    /// Parses a raw configuration string into a listen address.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ListenAddress`] when the value is neither a
    /// socket address nor a filesystem path - this is fatal at startup.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        if let Ok(addr) = raw.parse::<SocketAddr>() {
            return Ok(Self::Tcp(addr));
        }
        if raw.contains('/') {
            return Ok(Self::Unix(PathBuf::from(raw)));
        }
        Err(GatewayError::ListenAddress(raw.to_string()))
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Configuration for the gateway core.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Where the acceptor listens for client connections.
    pub listen_address: ListenAddress,

    /// Listen backlog passed to the socket.
    pub max_connections: usize,

    /// Fixed capacity of the match slot table; never resized at runtime.
    pub max_matches: usize,

    /// Bounded wait used by each accept attempt; doubles as the shutdown
    /// poll interval.
    pub accept_poll_interval: Duration,

    /// How long draining waits for outstanding connection tasks before
    /// abandoning them.
    pub shutdown_grace: Duration,

    /// Periods for the background maintenance tasks.
    pub housekeeping: HousekeepingConfig,

    /// Path to the local geolocation database; lookups are disabled when
    /// the file does not exist.
    pub geoloc_db_file: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: ListenAddress::Tcp(
                "127.0.0.1:6969"
                    .parse()
                    .expect("default listen address must parse"),
            ),
            max_connections: 1024,
            max_matches: 64,
            accept_poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(5),
            housekeeping: HousekeepingConfig::default(),
            geoloc_db_file: PathBuf::from("ext/geoloc.db"),
        }
    }
}

/// Periods for the three housekeeping tasks.
#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    /// Period of the supporter-privilege expiry sweep.
    pub privilege_sweep_interval: Duration,

    /// Period of the service-status cache invalidation.
    pub status_reroll_interval: Duration,

    /// Minimum ping interval the client protocol guarantees. A session
    /// silent for longer than this is considered dead; the liveness reaper
    /// runs at a third of it so a ghost is caught promptly.
    pub client_ping_interval: Duration,
}

impl HousekeepingConfig {
    /// Period of the liveness reaper: one third of the protocol's minimum
    /// expected ping interval.
    pub fn reaper_interval(&self) -> Duration {
        self.client_ping_interval / 3
    }
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            privilege_sweep_interval: Duration::from_secs(30 * 60),
            status_reroll_interval: Duration::from_secs(5 * 60),
            client_ping_interval: Duration::from_secs(300),
        }
    }
}
