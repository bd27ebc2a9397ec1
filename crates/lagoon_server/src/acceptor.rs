//! The connection acceptor: bind, accept, drain, close.
//!
//! The accept loop never blocks indefinitely. Every accept attempt is
//! bounded by the configured poll interval, and the shutdown flag is checked
//! between attempts, so a stop request is observed within one interval even
//! when no client ever connects. Draining hands the in-flight connection
//! tasks a grace period before abandoning them.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ListenAddress;
use crate::context::Gateway;
use crate::dispatch::{ClientStream, ConnectionHandler, PeerAddr};
use crate::error::GatewayError;

/// Requests a graceful stop of the accept loop.
///
/// Cheap to clone; the first call wins and later calls are no-ops.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// The bound listening socket, TCP or Unix.
enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

impl Listener {
    async fn bind(address: &ListenAddress, backlog: usize) -> Result<Self, GatewayError> {
        match address {
            ListenAddress::Tcp(addr) => Ok(Self::Tcp(bind_tcp(*addr, backlog)?)),
            ListenAddress::Unix(path) => Ok(Self::Unix(bind_unix(path)?, path.clone())),
        }
    }

    async fn accept(&self) -> std::io::Result<(ClientStream, PeerAddr)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((ClientStream::Tcp(stream), PeerAddr::Remote(peer.ip())))
            }
            Self::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                Ok((ClientStream::Unix(stream), PeerAddr::Local))
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Unix(..) => None,
        }
    }

    /// Closes the listener; for a Unix socket this also unlinks the file so
    /// the next start does not find its own stale socket.
    fn close(self) {
        if let Self::Unix(listener, path) = self {
            drop(listener);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove socket file {}: {e}", path.display());
            }
        }
    }
}

fn bind_tcp(addr: SocketAddr, backlog: usize) -> Result<TcpListener, GatewayError> {
    let network = |e: std::io::Error| GatewayError::Network(format!("bind {addr}: {e}"));

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(network)?;
    // Lets a restart rebind while the old socket lingers in TIME_WAIT.
    socket.set_reuse_address(true).map_err(network)?;
    socket.set_nonblocking(true).map_err(network)?;
    socket.bind(&addr.into()).map_err(network)?;
    socket.listen(backlog as i32).map_err(network)?;

    TcpListener::from_std(socket.into()).map_err(network)
}

fn bind_unix(path: &Path) -> Result<UnixListener, GatewayError> {
    let network =
        |e: std::io::Error| GatewayError::Network(format!("bind {}: {e}", path.display()));

    // A previous unclean exit may have left its socket file behind.
    if path.exists() {
        std::fs::remove_file(path).map_err(network)?;
    }

    let listener = UnixListener::bind(path).map_err(network)?;
    // Clients run as other users; the socket must be openable by them.
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).map_err(network)?;
    Ok(listener)
}

/// Owns the listening socket and the accept loop.
pub struct ConnectionAcceptor {
    gateway: Arc<Gateway>,
    handler: Arc<dyn ConnectionHandler>,
    listener: Listener,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionAcceptor {
    /// Binds the configured listen address and returns the acceptor plus
    /// the handle that stops it.
    ///
    /// # Errors
    ///
    /// Binding failures are fatal and surface as [`GatewayError::Network`].
    pub async fn bind(
        gateway: Arc<Gateway>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(Self, ShutdownHandle), GatewayError> {
        let listener = Listener::bind(
            &gateway.config.listen_address,
            gateway.config.max_connections,
        )
        .await?;
        info!("🔗 Listening on {}", gateway.config.listen_address);

        let (tx, rx) = watch::channel(false);
        Ok((
            Self {
                gateway,
                handler,
                listener,
                shutdown_rx: rx,
            },
            ShutdownHandle { tx: Arc::new(tx) },
        ))
    }

    /// The actual bound TCP address; useful when the configured port was 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until shutdown is requested, then drains.
    pub async fn run(self) -> Result<(), GatewayError> {
        let poll_interval = self.gateway.config.accept_poll_interval;
        let grace = self.gateway.config.shutdown_grace;
        let mut tasks: JoinSet<()> = JoinSet::new();

        while !*self.shutdown_rx.borrow() {
            match timeout(poll_interval, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    self.gateway.metrics.incr_connections_accepted();
                    debug!("Accepted connection from {peer}");

                    let gateway = self.gateway.clone();
                    let handler = self.handler.clone();
                    tasks.spawn(async move {
                        if let Err(e) = handler.handle(gateway, stream, peer).await {
                            warn!("Connection from {peer} closed with error: {e}");
                        }
                    });
                }
                Ok(Err(e)) => {
                    // Transient accept failures (EMFILE, resets in the
                    // backlog) must not take the listener down.
                    warn!("Accept failed: {e}");
                }
                Err(_) => {
                    // Poll interval elapsed with no client; loop around and
                    // re-check the shutdown flag.
                }
            }

            while tasks.try_join_next().is_some() {}
        }

        info!("⏳ Draining {} active connections", tasks.len());
        let drained = timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Drain grace period elapsed, aborting {} connections",
                tasks.len()
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        self.listener.close();
        info!("🔗 Listener closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::context::BOT_PLAYER_ID;
    use crate::resources::{NullMetrics, Resources};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::time::sleep;

    async fn gateway_with(config: GatewayConfig) -> Arc<Gateway> {
        let store = Arc::new(MemoryStore::new());
        store.set_bot_name(BOT_PLAYER_ID, "Lagoon");
        let resources = Resources {
            store,
            geo: None,
            metrics: Arc::new(NullMetrics),
        };
        Gateway::bootstrap(config, resources).await.unwrap()
    }

    fn fast_config(listen_address: ListenAddress) -> GatewayConfig {
        GatewayConfig {
            listen_address,
            accept_poll_interval: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(200),
            ..GatewayConfig::default()
        }
    }

    /// Counts connections and closes them immediately.
    #[derive(Default)]
    struct CountingHandler {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionHandler for CountingHandler {
        async fn handle(
            &self,
            _gateway: Arc<Gateway>,
            _stream: ClientStream,
            _peer: PeerAddr,
        ) -> Result<(), GatewayError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Reads forever; only an abort ends it.
    struct HangingHandler;

    #[async_trait]
    impl ConnectionHandler for HangingHandler {
        async fn handle(
            &self,
            _gateway: Arc<Gateway>,
            mut stream: ClientStream,
            _peer: PeerAddr,
        ) -> Result<(), GatewayError> {
            let mut buf = [0u8; 64];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => sleep(Duration::from_secs(3600)).await,
                    Ok(_) => {}
                    Err(_) => sleep(Duration::from_secs(3600)).await,
                }
            }
        }
    }

    #[tokio::test]
    async fn accepts_and_dispatches_connections() {
        let config = fast_config(ListenAddress::Tcp("127.0.0.1:0".parse().unwrap()));
        let gateway = gateway_with(config).await;
        let handler = Arc::new(CountingHandler::default());

        let (acceptor, shutdown) = ConnectionAcceptor::bind(gateway, handler.clone())
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();
        let running = tokio::spawn(acceptor.run());

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();

        // Wait for both connections to be dispatched.
        for _ in 0..50 {
            if handler.handled.load(Ordering::SeqCst) == 2 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(handler.handled.load(Ordering::SeqCst), 2);

        shutdown.shutdown();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_observed_without_any_client() {
        let config = fast_config(ListenAddress::Tcp("127.0.0.1:0".parse().unwrap()));
        let gateway = gateway_with(config).await;

        let (acceptor, shutdown) =
            ConnectionAcceptor::bind(gateway, Arc::new(CountingHandler::default()))
                .await
                .unwrap();
        let running = tokio::spawn(acceptor.run());

        shutdown.shutdown();
        // The loop re-checks the flag within one poll interval.
        timeout(Duration::from_secs(2), running)
            .await
            .expect("accept loop should stop promptly")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn no_new_connections_after_close() {
        let config = fast_config(ListenAddress::Tcp("127.0.0.1:0".parse().unwrap()));
        let gateway = gateway_with(config).await;

        let (acceptor, shutdown) =
            ConnectionAcceptor::bind(gateway, Arc::new(CountingHandler::default()))
                .await
                .unwrap();
        let addr = acceptor.local_addr().unwrap();
        let running = tokio::spawn(acceptor.run());

        shutdown.shutdown();
        running.await.unwrap().unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn drain_aborts_hung_connections_after_the_grace_period() {
        let config = fast_config(ListenAddress::Tcp("127.0.0.1:0".parse().unwrap()));
        let gateway = gateway_with(config).await;

        let (acceptor, shutdown) = ConnectionAcceptor::bind(gateway, Arc::new(HangingHandler))
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();
        let running = tokio::spawn(acceptor.run());

        let _client = TcpStream::connect(addr).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        shutdown.shutdown();
        // Grace is 200ms; the hung task is abandoned, not waited out.
        timeout(Duration::from_secs(2), running)
            .await
            .expect("drain should abort hung connections")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn unix_socket_is_world_accessible_and_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("lagoon.sock");

        let config = fast_config(ListenAddress::Unix(sock.clone()));
        let gateway = gateway_with(config).await;

        let (acceptor, shutdown) =
            ConnectionAcceptor::bind(gateway, Arc::new(CountingHandler::default()))
                .await
                .unwrap();

        let mode = std::fs::metadata(&sock).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);

        let running = tokio::spawn(acceptor.run());
        shutdown.shutdown();
        running.await.unwrap().unwrap();

        assert!(!sock.exists());
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced_at_bind() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("lagoon.sock");
        std::fs::write(&sock, b"stale").unwrap();

        let config = fast_config(ListenAddress::Unix(sock.clone()));
        let gateway = gateway_with(config).await;

        let (acceptor, _shutdown) =
            ConnectionAcceptor::bind(gateway, Arc::new(CountingHandler::default()))
                .await
                .unwrap();
        drop(acceptor);
        assert!(sock.exists());
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap();

        let config = fast_config(ListenAddress::Tcp(addr));
        let gateway = gateway_with(config).await;

        let result = ConnectionAcceptor::bind(gateway, Arc::new(CountingHandler::default())).await;
        assert!(matches!(result, Err(GatewayError::Network(_))));
    }
}
