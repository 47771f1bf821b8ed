//! HTTP front end: accepts connections and runs every request through the
//! [`RequestTracker`] before the downstream [`Handler`].
//!
//! Connections are served with hyper's auto builder (HTTP/1.1 and h2c).
//! The tracker and the downstream are synchronous, so each request runs on
//! a blocking worker. An optional internal listener serves `/health`,
//! `/metrics` and `/counters`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use request_tracker::config::ServerConfig;
//! use request_tracker::runtime::TrackerRuntime;
//! use request_tracker::server::{DemoApp, Server};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = ServerConfig::from_env()?;
//! let runtime = Arc::new(TrackerRuntime::builder().build()?);
//! let server = Server::new(config, runtime, DemoApp::new());
//! server.run().await
//! # }
//! ```
//!
//! Shutdown is two-phase: [`Server::trigger_shutdown`] stops accepting,
//! then [`Server::wait_for_drain`] waits for open connections to finish.

pub mod connection;
mod demo;
pub mod internal;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::middleware::{Handler, RequestTracker};
use crate::runtime::TrackerRuntime;

use connection::ConnectionContext;
pub use demo::DemoApp;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const LISTEN_BACKLOG: i32 = 1024;
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// HTTP server running every request through the tracker.
pub struct Server<H: Handler> {
    config: ServerConfig,
    runtime: Arc<TrackerRuntime>,
    ctx: Arc<ConnectionContext<H>>,
    active_connections: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_started: AtomicBool,
}

impl<H: Handler + 'static> Server<H> {
    pub fn new(config: ServerConfig, runtime: Arc<TrackerRuntime>, downstream: H) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));
        let ctx = Arc::new(ConnectionContext {
            tracker: RequestTracker::new(Arc::clone(&runtime)),
            downstream: Arc::new(downstream),
            active_connections: Arc::clone(&active_connections),
        });

        Self {
            config,
            runtime,
            ctx,
            active_connections,
            shutdown_tx,
            shutdown_rx,
            shutdown_started: AtomicBool::new(false),
        }
    }

    pub fn runtime(&self) -> &Arc<TrackerRuntime> {
        &self.runtime
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Flips to `true` once shutdown is triggered.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.config.drain_timeout
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::from_std(bind(self.config.listen_addr)?)?;
        self.serve(listener).await
    }

    /// Serve an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        info!("Server listening on http://{}", listener.local_addr()?);
        let internal = self.config.internal_addr.map(|addr| self.spawn_internal(addr));

        let mut shutdown_rx = self.shutdown_receiver();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        tune(&stream);
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(ctx.handle_connection(stream, remote_addr));
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                _ = shutdown_rx.changed() => {
                    debug!("Shutdown signalled, accept loop stopped");
                    break;
                }
            }
        }

        if let Some(handle) = internal {
            let _ = handle.await;
        }
        Ok(())
    }

    fn spawn_internal(&self, addr: SocketAddr) -> JoinHandle<()> {
        let runtime = Arc::clone(&self.runtime);
        let active = Arc::clone(&self.active_connections);
        let mut shutdown_rx = self.shutdown_receiver();
        info!("Internal server listening on http://{}", addr);

        tokio::spawn(async move {
            tokio::select! {
                result = internal::run_internal_server(addr, runtime, active) => {
                    if let Err(e) = result {
                        error!("Internal server error: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {}
            }
        })
    }

    /// Stop the accept loop and the internal server. Idempotent.
    pub fn trigger_shutdown(&self) {
        if !self.shutdown_started.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(true);
        }
    }

    /// Wait until no connection is open. `false` if `timeout` ran out first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            while self.active_connections() > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Drain timeout reached with {} active connections",
                self.active_connections()
            );
        }
        drained.is_ok()
    }
}

/// Non-blocking listener with SO_REUSEADDR (and SO_REUSEPORT on unix).
fn bind(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Disable Nagle and enable keepalive probes on an accepted stream.
fn tune(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(5))
        .with_interval(Duration::from_secs(1));
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}
