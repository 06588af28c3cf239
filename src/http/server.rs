//! Server factory and the active-server handle.
//!
//! `ServerFactory::prepare` builds an immutable description of a listener
//! (address, timeouts, handler) without touching process state. Starting a
//! prepared server binds the socket explicitly first, so bind failures are
//! observable and can be retried with backoff during certificate rotation,
//! then serves on a background task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use hyper_util::rt::TokioTimer;
use rustls_acme::axum::AxumAcceptor;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;

use crate::config::{ServerConfig, BIND_RETRY_ATTEMPTS, BIND_RETRY_INITIAL_DELAY_MS};

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Server error: {0}")]
    Serve(#[from] io::Error),

    #[error("Server task panicked")]
    Panicked,
}

/// The TLS material source a listener is started with. Cloned per rebuild;
/// the underlying certificate supplier is shared, so handshakes always see
/// the current material regardless of which listener accepted them.
#[derive(Clone)]
pub enum TlsBackend {
    Plain,
    Rustls(RustlsConfig),
    Acme(AxumAcceptor),
}

/// Builds immutable server descriptions on demand.
///
/// Called once for the initial server and again for every certificate
/// renewal, since the handler and timeouts are identical across rebuilds but
/// the TLS material is not.
#[derive(Clone)]
pub struct ServerFactory {
    config: Arc<ServerConfig>,
    router: Router,
}

impl ServerFactory {
    pub fn new(config: Arc<ServerConfig>, router: Router) -> Self {
        Self { config, router }
    }

    /// Produce a fresh server description. Does not bind or listen.
    pub fn prepare(&self) -> Result<PreparedServer, ServerError> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| ServerError::TlsConfig(e.to_string()))?;
        // The write timeout bounds how long a single response may take.
        let router = self
            .router
            .clone()
            .layer(TimeoutLayer::new(self.config.write_timeout));
        Ok(PreparedServer {
            addr,
            router,
            read_timeout: self.config.read_timeout,
            idle_timeout: self.config.idle_timeout,
        })
    }
}

/// An immutable, not-yet-listening server: address, timeouts and handler.
pub struct PreparedServer {
    addr: SocketAddr,
    router: Router,
    read_timeout: Duration,
    idle_timeout: Duration,
}

impl PreparedServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the listener (retrying while the address is still held by an
    /// outgoing listener) and start serving on a background task.
    pub async fn start(self, tls: &TlsBackend) -> Result<ActiveServer, ServerError> {
        let listener = bind_with_retry(self.addr).await?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.addr,
            source,
        })?;

        // The read timeout bounds header reads, including the wait for the
        // next request on an HTTP/1 keep-alive connection; HTTP/2 idle is
        // bounded by keep-alive pings.
        let read_timeout = self.read_timeout;
        let idle_timeout = self.idle_timeout;
        let configure_http = |builder: &mut hyper_util::server::conn::auto::Builder<
            hyper_util::rt::TokioExecutor,
        >| {
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(read_timeout);
            builder
                .http2()
                .timer(TokioTimer::new())
                .keep_alive_interval(idle_timeout)
                .keep_alive_timeout(read_timeout);
        };

        let handle = Handle::new();
        let app = self.router.into_make_service();
        let task: JoinHandle<io::Result<()>> = match tls {
            TlsBackend::Plain => {
                let mut server = axum_server::from_tcp(listener);
                configure_http(server.http_builder());
                tokio::spawn(server.handle(handle.clone()).serve(app))
            }
            TlsBackend::Rustls(rustls) => {
                let mut server = axum_server::from_tcp_rustls(listener, rustls.clone());
                configure_http(server.http_builder());
                tokio::spawn(server.handle(handle.clone()).serve(app))
            }
            TlsBackend::Acme(acceptor) => {
                let mut server = axum_server::from_tcp(listener).acceptor(acceptor.clone());
                configure_http(server.http_builder());
                tokio::spawn(server.handle(handle.clone()).serve(app))
            }
        };

        tracing::info!(%addr, "server listening");
        Ok(ActiveServer { addr, handle, task })
    }
}

/// Handle to the one server currently accepting connections.
///
/// Single-owner: held by the renewal coordinator when TLS hot-reload is
/// active, otherwise by the lifecycle supervisor. At most one active server
/// accepts connections per address at any time.
pub struct ActiveServer {
    addr: SocketAddr,
    handle: Handle,
    pub(crate) task: JoinHandle<io::Result<()>>,
}

impl ActiveServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// A clonable handle for initiating shutdown from outside the owner.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Stop accepting, drain in-flight connections for up to `grace`, then
    /// wait for the serve task to finish. The listener socket is released as
    /// soon as draining begins.
    pub async fn shutdown(self, grace: Duration) -> Result<(), ServerError> {
        self.handle.graceful_shutdown(Some(grace));
        self.task.await.map_err(|_| ServerError::Panicked)??;
        Ok(())
    }
}

/// Bind a listener, backing off and retrying while the address is in use.
///
/// Needed during hot-swap: the outgoing listener releases the port when its
/// drain begins, but the exact instant is not observable from here.
async fn bind_with_retry(addr: SocketAddr) -> Result<std::net::TcpListener, ServerError> {
    let mut delay = Duration::from_millis(BIND_RETRY_INITIAL_DELAY_MS);
    let mut attempt = 1;
    loop {
        match std::net::TcpListener::bind(addr) {
            Ok(listener) => {
                listener
                    .set_nonblocking(true)
                    .map_err(|source| ServerError::Bind { addr, source })?;
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < BIND_RETRY_ATTEMPTS => {
                tracing::warn!(
                    %addr,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "address in use, retrying bind"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(source) => return Err(ServerError::Bind { addr, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[tokio::test]
    async fn bind_retry_succeeds_once_the_port_is_released() {
        let blocker = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = blocker.local_addr().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            drop(blocker);
        });

        let listener = bind_with_retry(addr).await.unwrap();
        assert_eq!(listener.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn bind_retry_gives_up_after_exhausting_attempts() {
        let blocker = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = blocker.local_addr().unwrap();

        let err = bind_with_retry(addr).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        drop(blocker);
    }
}
