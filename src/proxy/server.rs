//! Proxy listeners and per-connection serving.
//!
//! # Responsibilities
//! - Bind plain and TLS listeners with inbound backpressure
//! - Serve HTTP/1.1 with upgrade support (needed for CONNECT)
//! - Inspect and tag every request with a request id
//! - Graceful close: stop accepting, drain in-flight connections

use axum::body::Body;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::config::ProxyConfig;
use crate::lifecycle::Shutdown;
use crate::load_balancer::LoadBalancer;
use crate::net::connection::ConnectionTracker;
use crate::net::dialer::Dialer;
use crate::net::listener::{Accepted, Listener, ListenerError};
use crate::observability::spans;
use crate::proxy::error::{ProxyError, ProxyResult};
use crate::proxy::response::set_request_id;
use crate::proxy::{forward, tunnel};

/// Tunables for [`ProxyServer`].
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Deadline for one forwarded request, up to the response head.
    pub upstream_timeout: Duration,
    /// Deadline for opening a CONNECT upstream.
    pub connect_timeout: Duration,
    pub cache_enabled: bool,
    /// Larger upstream bodies are relayed but not cached.
    pub max_body_bytes: usize,
    /// Inbound connections per listener before accepting pauses.
    pub max_connections: usize,
    /// How long `close_all` waits for in-flight connections.
    pub shutdown_grace: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            cache_enabled: true,
            max_body_bytes: 10 * 1024 * 1024,
            max_connections: 10_000,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl From<&ProxyConfig> for ProxyOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            upstream_timeout: Duration::from_secs(config.timeouts.upstream_request_secs),
            connect_timeout: Duration::from_secs(config.connections.connect_timeout_secs),
            cache_enabled: config.cache.enabled,
            max_body_bytes: config.cache.max_body_bytes,
            max_connections: config.listener.max_connections,
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        }
    }
}

/// A bound listener, as reported by [`ProxyServer::active_listeners`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListenerInfo {
    pub address: SocketAddr,
    pub tls: bool,
}

struct ListenerHandle {
    info: ListenerInfo,
    task: JoinHandle<()>,
}

pub(crate) struct ProxyInner {
    pub(crate) cache: Arc<ResponseCache>,
    pub(crate) balancer: LoadBalancer,
    pub(crate) dialer: Dialer,
    pub(crate) options: ProxyOptions,
    pub(crate) tracker: ConnectionTracker,
    pub(crate) shutdown: Shutdown,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl ProxyInner {
    fn listeners(&self) -> MutexGuard<'_, Vec<ListenerHandle>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caching forward proxy with CONNECT tunneling. Cheap to clone.
#[derive(Clone)]
pub struct ProxyServer {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("listeners", &self.active_listeners())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

impl ProxyServer {
    pub fn new(options: ProxyOptions, cache: Arc<ResponseCache>, balancer: LoadBalancer, dialer: Dialer) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                cache,
                balancer,
                dialer,
                options,
                tracker: ConnectionTracker::new(),
                shutdown: Shutdown::new(),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Bind a plain HTTP listener. Returns the bound address (useful with port 0).
    pub async fn listen(&self, addr: SocketAddr) -> ProxyResult<SocketAddr> {
        self.spawn_listener(addr, None).await
    }

    /// Bind a listener that terminates TLS before speaking HTTP.
    pub async fn listen_tls(&self, addr: SocketAddr, acceptor: TlsAcceptor) -> ProxyResult<SocketAddr> {
        self.spawn_listener(addr, Some(acceptor)).await
    }

    async fn spawn_listener(&self, addr: SocketAddr, tls: Option<TlsAcceptor>) -> ProxyResult<SocketAddr> {
        if self.inner.shutdown.is_triggered() {
            return Err(ProxyError::ShuttingDown);
        }
        let listener = Listener::bind(addr, self.inner.options.max_connections).await?;
        let local = listener.local_addr();
        let info = ListenerInfo {
            address: local,
            tls: tls.is_some(),
        };
        tracing::info!(address = %local, tls = info.tls, "Proxy listening");

        let task = tokio::spawn(accept_loop(self.inner.clone(), listener, tls));
        self.inner.listeners().push(ListenerHandle { info, task });
        Ok(local)
    }

    pub fn active_listeners(&self) -> Vec<ListenerInfo> {
        self.inner
            .listeners()
            .iter()
            .filter(|handle| !handle.task.is_finished())
            .map(|handle| handle.info)
            .collect()
    }

    /// In-flight client connections and tunnels.
    pub fn active_connections(&self) -> u64 {
        self.inner.tracker.active_count()
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.inner.cache
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.inner.balancer
    }

    /// Stop every listener and wait for in-flight connections to finish,
    /// up to the configured grace period.
    ///
    /// Returns false if connections were still open at the deadline.
    pub async fn close_all(&self) -> bool {
        self.inner.shutdown.trigger();
        let handles: Vec<ListenerHandle> = self.inner.listeners().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.task.await {
                tracing::warn!(address = %handle.info.address, error = %e, "Listener task failed");
            }
        }

        let grace = self.inner.options.shutdown_grace;
        let drained = self.inner.tracker.wait_idle_for(grace).await;
        if drained {
            tracing::info!("All proxy listeners closed");
        } else {
            tracing::warn!(
                remaining = self.inner.tracker.active_count(),
                grace_secs = grace.as_secs(),
                "Proxy connections still open after grace period"
            );
        }
        drained
    }
}

async fn accept_loop(inner: Arc<ProxyInner>, listener: Listener, tls: Option<TlsAcceptor>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.recv() => break,
        };
        let Accepted { stream, peer, slot } = match accepted {
            Ok(accepted) => accepted,
            Err(ListenerError::Accept(e)) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "Listener stopped");
                break;
            }
        };

        let guard = inner.tracker.track();
        let inner = inner.clone();
        let tls = tls.clone();
        let span = spans::connection_span(peer, tls.is_some());
        tokio::spawn(
            async move {
                let _slot = slot;
                let _guard = guard;
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => serve_connection(inner, stream).await,
                        Err(e) => {
                            tracing::debug!(error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                    None => serve_connection(inner, stream).await,
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, "Client connection ended with error");
                }
            }
            .instrument(span),
        );
    }

    tracing::info!(address = %listener.local_addr(), "Proxy listener closed");
}

async fn serve_connection<S>(inner: Arc<ProxyInner>, stream: S) -> Result<(), hyper::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut shutdown = inner.shutdown.subscribe();
    let service = service_fn(move |req: Request<Incoming>| {
        let inner = inner.clone();
        async move { Ok::<_, Infallible>(handle(inner, req).await) }
    });

    let connection = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    }
}

async fn handle(inner: Arc<ProxyInner>, req: Request<Incoming>) -> Response<Body> {
    let request_id = Uuid::new_v4();
    let span = spans::request_span(request_id, req.method(), req.uri());

    async move {
        tracing::debug!(version = ?req.version(), headers = ?req.headers(), "Inspecting request");
        let mut response = if req.method() == Method::CONNECT {
            tunnel::connect(inner, req).await
        } else {
            forward::forward(&inner, req, request_id).await
        };
        set_request_id(response.headers_mut(), request_id);
        response
    }
    .instrument(span)
    .await
}
