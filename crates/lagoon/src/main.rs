//! Main application entry point for the gateway
//!
//! Provides CLI interface, configuration loading, and server startup wiring
//! the session core, housekeeping, and the connection acceptor together.

use clap::{Arg, Command};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lagoon_server::acceptor::ConnectionAcceptor;
use lagoon_server::dispatch::{ClientStream, PeerAddr};
use lagoon_server::housekeeping::HousekeepingScheduler;
use lagoon_server::resources::{NullMetrics, Resources};
use lagoon_server::store::MemoryStore;
use lagoon_server::{
    ConnectionHandler, Gateway, GatewayConfig, GatewayError, HousekeepingConfig, ListenAddress,
};

// ============================================================================
// Configuration
// ============================================================================

/// Application configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerSettings,
    /// Background maintenance periods
    pub housekeeping: HousekeepingSettings,
    /// Geolocation database
    pub geolocation: GeolocationSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen address: `host:port` for TCP, a filesystem path for a Unix socket
    pub listen_address: String,
    /// Listen backlog
    pub max_connections: usize,
    /// Capacity of the multiplayer match table
    pub max_matches: usize,
    /// Accept poll interval in milliseconds
    pub accept_poll_interval_ms: u64,
    /// Seconds to wait for in-flight connections at shutdown
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingSettings {
    /// Supporter privilege expiry sweep period in seconds
    pub privilege_sweep_interval_secs: u64,
    /// Service status cache reroll period in seconds
    pub status_reroll_interval_secs: u64,
    /// Minimum client ping interval in seconds; sessions silent longer are evicted
    pub client_ping_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationSettings {
    /// Path to the CIDR geolocation database; lookups disabled when missing
    pub db_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter
    pub level: String,
    /// JSON formatting
    pub json_format: bool,
    /// Log to file
    pub file_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                listen_address: "127.0.0.1:6969".to_string(),
                max_connections: 1024,
                max_matches: 64,
                accept_poll_interval_ms: 250,
                shutdown_grace_secs: 5,
            },
            housekeeping: HousekeepingSettings {
                privilege_sweep_interval_secs: 1800,
                status_reroll_interval_secs: 300,
                client_ping_interval_secs: 300,
            },
            geolocation: GeolocationSettings {
                db_file: "ext/geoloc.db".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Convert to the gateway core's configuration
    pub fn to_gateway_config(&self) -> Result<GatewayConfig, GatewayError> {
        Ok(GatewayConfig {
            listen_address: ListenAddress::parse(&self.server.listen_address)?,
            max_connections: self.server.max_connections,
            max_matches: self.server.max_matches,
            accept_poll_interval: Duration::from_millis(self.server.accept_poll_interval_ms),
            shutdown_grace: Duration::from_secs(self.server.shutdown_grace_secs),
            housekeeping: HousekeepingConfig {
                privilege_sweep_interval: Duration::from_secs(
                    self.housekeeping.privilege_sweep_interval_secs,
                ),
                status_reroll_interval: Duration::from_secs(
                    self.housekeeping.status_reroll_interval_secs,
                ),
                client_ping_interval: Duration::from_secs(
                    self.housekeeping.client_ping_interval_secs,
                ),
            },
            geoloc_db_file: PathBuf::from(&self.geolocation.db_file),
        })
    }

    /// Configuration validation
    pub fn validate(&self) -> Result<(), String> {
        // Validate listen address
        if ListenAddress::parse(&self.server.listen_address).is_err() {
            return Err(format!(
                "Invalid listen address: {}",
                self.server.listen_address
            ));
        }

        if self.server.max_matches == 0 {
            return Err("max_matches must be at least 1".to_string());
        }

        if self.server.accept_poll_interval_ms == 0 {
            return Err("accept_poll_interval_ms must be at least 1".to_string());
        }

        // The liveness reaper runs at a third of this; it must not round to zero
        if self.housekeeping.client_ping_interval_secs < 3 {
            return Err("client_ping_interval_secs must be at least 3".to_string());
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            ));
        }

        Ok(())
    }
}

// ============================================================================
// CLI Interface
// ============================================================================

/// Command line arguments
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub listen_address: Option<String>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl CliArgs {
    /// Parse command line arguments
    pub fn parse() -> Self {
        let matches = Command::new("Lagoon Gateway")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Session and connection lifecycle gateway for rhythm game clients")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("listen")
                    .short('b')
                    .long("listen")
                    .value_name("ADDRESS")
                    .help("Listen address (host:port or a Unix socket path)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("Default config path should always be set"),
            ),
            listen_address: matches.get_one::<String>("listen").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

// ============================================================================
// Logging Setup
// ============================================================================

/// Initialize logging system
fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

// ============================================================================
// Signal Handling
// ============================================================================

/// Setup graceful shutdown signal handling
async fn setup_signal_handlers() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("📡 Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("📡 Received SIGTERM");
            }
            _ = sighup.recv() => {
                info!("📡 Received SIGHUP");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("📡 Received Ctrl+C");
    }

    Ok(())
}

// ============================================================================
// Connection Handling
// ============================================================================

/// Placeholder protocol driver.
///
/// The wire protocol lives in its own crate and plugs in through
/// [`ConnectionHandler`]; this one keeps the connection open, discards
/// whatever arrives, and lets the lifecycle machinery be exercised end to
/// end without it.
struct DrainProtocol;

#[lagoon_server::async_trait]
impl ConnectionHandler for DrainProtocol {
    async fn handle(
        &self,
        _gateway: Arc<Gateway>,
        mut stream: ClientStream,
        peer: PeerAddr,
    ) -> Result<(), GatewayError> {
        use tokio::io::AsyncReadExt;

        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Read from {peer} failed: {e}");
                    break;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Application
// ============================================================================

/// Main application struct
pub struct Application {
    config: AppConfig,
    gateway: Arc<Gateway>,
}

impl Application {
    /// Create new application: load configuration, acquire resources, and
    /// bootstrap the gateway context
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(listen_address) = args.listen_address {
            config.server.listen_address = listen_address;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        // Validate configuration
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {}", e).into());
        }

        // Setup logging
        setup_logging(&config.logging, args.json_logs)?;

        // Display banner after logging is setup
        display_banner();

        let gateway_config = config.to_gateway_config()?;

        // TODO: wire the production database store once its crate lands;
        // until then the gateway runs over the in-memory store.
        let store = Arc::new(MemoryStore::new());
        store.set_bot_name(lagoon_server::context::BOT_PLAYER_ID, "Lagoon");

        let resources = Resources::acquire(
            store,
            &gateway_config.geoloc_db_file,
            Arc::new(NullMetrics),
        )
        .await?;

        let gateway = Gateway::bootstrap(gateway_config, resources).await?;

        info!("🚀 Lagoon Gateway v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Listen: {}",
            args.config_path.display(),
            gateway.config.listen_address
        );

        Ok(Self { config, gateway })
    }

    /// Run the application until a shutdown signal arrives
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Lagoon Gateway");
        info!("📋 Configuration Summary:");
        info!("  🌐 Listen address: {}", self.gateway.config.listen_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  🎮 Match slots: {}", self.config.server.max_matches);
        info!(
            "  ⏱️ Shutdown grace: {}s",
            self.config.server.shutdown_grace_secs
        );

        let housekeeping = HousekeepingScheduler::start(self.gateway.clone());

        let (acceptor, shutdown) =
            ConnectionAcceptor::bind(self.gateway.clone(), Arc::new(DrainProtocol)).await?;
        let acceptor_handle = tokio::spawn(acceptor.run());

        info!("✅ Lagoon Gateway is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        setup_signal_handlers().await?;

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        shutdown.shutdown();

        // The acceptor drains in-flight connections within the grace period
        match acceptor_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("❌ Acceptor error during shutdown: {e}"),
            Err(e) => error!("❌ Acceptor task failed: {e}"),
        }

        housekeeping.shutdown().await;
        self.gateway.release_resources().await;

        info!("✅ Lagoon Gateway shutdown complete");
        info!("📊 Uptime: {}s", self.gateway.uptime());

        Ok(())
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Create and run application
    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Utilities and Helpers
// ============================================================================

/// Display startup banner using proper logging
fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║            🌊 LAGOON GATEWAY 🌊          ║");
    info!("║                 v{}                   ║", version);
    info!("║                                          ║");
    info!("║  Session & Connection Lifecycle Core     ║");
    info!("║  for Real-Time Rhythm Game Clients       ║");
    info!("║                                          ║");
    info!("║  🎯 Explicit Shared-State Context        ║");
    info!("║  🧹 Independent Housekeeping Tasks       ║");
    info!("║  🔗 TCP + Unix Socket Support            ║");
    info!("╚══════════════════════════════════════════╝");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        // Test conversion to the gateway core's configuration
        let gateway_config = config
            .to_gateway_config()
            .expect("Default config should convert to GatewayConfig");
        assert_eq!(gateway_config.max_connections, 1024);
        assert_eq!(gateway_config.max_matches, 64);
        assert_eq!(
            gateway_config.accept_poll_interval,
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn test_config_validation() {
        let mut config = AppConfig::default();

        // Test invalid listen address
        config.server.listen_address = "invalid".to_string();
        assert!(config.validate().is_err());

        // A Unix socket path is a valid listen address
        config.server.listen_address = "/tmp/lagoon.sock".to_string();
        assert!(config.validate().is_ok());

        // Test zero match capacity
        config.server.listen_address = "127.0.0.1:6969".to_string();
        config.server.max_matches = 0;
        assert!(config.validate().is_err());

        // Test degenerate ping interval
        config.server.max_matches = 64;
        config.housekeeping.client_ping_interval_secs = 1;
        assert!(config.validate().is_err());

        // Test invalid log level
        config.housekeeping.client_ping_interval_secs = 300;
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let args = CliArgs {
            config_path: PathBuf::from("test.toml"),
            listen_address: Some("127.0.0.1:9000".to_string()),
            log_level: Some("debug".to_string()),
            json_logs: true,
        };

        assert_eq!(args.config_path, PathBuf::from("test.toml"));
        assert_eq!(args.listen_address, Some("127.0.0.1:9000".to_string()));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
    }

    #[tokio::test]
    async fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.toml");

        // First load creates the default file
        let created = AppConfig::load_from_file(&path)
            .await
            .expect("Failed to create default config");
        assert!(path.exists());

        // Second load reads it back
        let loaded = AppConfig::load_from_file(&path)
            .await
            .expect("Failed to read config back");
        assert_eq!(
            created.server.listen_address,
            loaded.server.listen_address
        );
        assert_eq!(
            created.housekeeping.privilege_sweep_interval_secs,
            loaded.housekeeping.privilege_sweep_interval_secs
        );
    }
}
