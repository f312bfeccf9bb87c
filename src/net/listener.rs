//! Inbound TCP listener with a cap on concurrent client connections.
//!
//! Once `max_connections` clients are being served, accepting pauses until
//! one of them finishes; pending clients wait in the kernel backlog.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// A single accept failed; the listener is still usable.
    #[error("failed to accept: {0}")]
    Accept(std::io::Error),
    #[error("listener closed")]
    Closed,
}

/// One accepted client. Dropping `slot` frees room for the next client.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub slot: ClientSlot,
}

/// Occupied client capacity, released on drop (panics included).
#[derive(Debug)]
pub struct ClientSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct Listener {
    socket: TcpListener,
    local_addr: SocketAddr,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind `addr`. A `max_connections` of zero is treated as one.
    pub async fn bind(addr: SocketAddr, max_connections: usize) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind { addr, source };
        let socket = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;
        let max_connections = max_connections.max(1);
        tracing::debug!(address = %local_addr, max_connections, "Listener bound");

        Ok(Self {
            socket,
            local_addr,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Wait for a free slot, then for the next client.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        tracing::trace!(%peer, free_slots = self.slots.available_permits(), "Client accepted");

        Ok(Accepted {
            stream,
            peer,
            slot: ClientSlot { _permit: permit },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
