//! Outbound transport establishment (plain TCP or TLS over TCP).

use serde::{Deserialize, Serialize};
use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::load_balancer::UpstreamTarget;
use crate::net::tls;

/// Any bidirectional byte stream the core can own.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Type-erased upstream transport.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Transport used to reach an upstream target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Plain,
    Tls,
}

/// Opens upstream transports. Cheap to clone.
#[derive(Clone)]
pub struct Dialer {
    tls: TlsConnector,
    keep_alive: Option<Duration>,
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

impl Dialer {
    pub fn new(tls: TlsConnector, keep_alive: Option<Duration>) -> Self {
        Self { tls, keep_alive }
    }

    /// Dialer trusting the webpki roots, with TCP keep-alive at `keep_alive`.
    pub fn with_default_roots(keep_alive: Option<Duration>) -> Result<Self, std::io::Error> {
        Ok(Self::new(tls::client_connector(None)?, keep_alive))
    }

    /// Open a raw TCP stream to `target`.
    pub async fn connect_tcp(&self, target: &UpstreamTarget) -> Result<TcpStream, std::io::Error> {
        let stream = TcpStream::connect(target.authority()).await?;
        stream.set_nodelay(true)?;
        if let Some(interval) = self.keep_alive {
            SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(interval))?;
        }
        Ok(stream)
    }

    /// Open a transport of the given kind. TLS includes the handshake.
    pub async fn connect(
        &self,
        target: &UpstreamTarget,
        kind: TransportKind,
    ) -> Result<BoxedStream, std::io::Error> {
        let stream = self.connect_tcp(target).await?;
        match kind {
            TransportKind::Plain => Ok(Box::new(stream)),
            TransportKind::Tls => {
                let name = tls::server_name(&target.host)?;
                let tls_stream = self.tls.connect(name, stream).await?;
                Ok(Box::new(tls_stream))
            }
        }
    }
}
