//! Error types for proxy operations.

use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::net::listener::ListenerError;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No upstream could be chosen for the request.
    #[error("no upstream available: {0}")]
    UpstreamUnavailable(String),

    /// Failed to connect to upstream server.
    #[error("failed to connect to upstream '{addr}': {source}")]
    UpstreamConnect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The upstream did not answer within the request deadline.
    #[error("upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// I/O error (socket operations, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Failed while buffering a body.
    #[error("body error: {0}")]
    Body(#[from] axum::Error),

    /// The client request cannot be proxied as sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// `listen` was called after `close_all`.
    #[error("proxy is shutting down")]
    ShuttingDown,
}

impl ProxyError {
    /// Status synthesized for the client when this error ends a request.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
