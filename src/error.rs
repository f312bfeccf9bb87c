//! Error taxonomy for the connection core.
//!
//! Lookup and admission mistakes (`DuplicateName`, `UnknownConnection`,
//! `NoTargets`) are usage errors and are never retried. Transport failures
//! and connect timeouts are transient; retrying them is up to the caller
//! (see [`crate::resilience::retry`]).

use crate::net::connection::ConnectionState;
use thiserror::Error;

/// Errors produced by [`crate::registry::ConnectionRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A live connection already uses this name.
    #[error("connection '{0}' already exists")]
    DuplicateName(String),

    /// No connection is registered under this name.
    #[error("no connection found with name '{0}'")]
    UnknownConnection(String),

    /// The load balancer rotation is empty.
    #[error("no upstream targets available for load balancing")]
    NoTargets,

    /// Ciphertext failed authentication or was malformed.
    #[error("decryption failed on connection '{name}'")]
    Decryption { name: String },

    /// The payload could not be encrypted (RNG or key failure).
    #[error("encryption failed on connection '{name}'")]
    Encryption { name: String },

    /// The transport could not be established within the deadline.
    #[error("connection '{name}' timed out after {timeout_ms}ms")]
    ConnectTimeout { name: String, timeout_ms: u64 },

    /// Reset, refused or any other I/O failure.
    #[error("transport error on connection '{name}': {source}")]
    Transport {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection exists but its state does not allow the operation.
    #[error("connection '{name}' is {state:?}")]
    InvalidState {
        name: String,
        state: ConnectionState,
    },
}

impl RegistryError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::ConnectTimeout { .. } | RegistryError::Transport { .. }
        )
    }

    pub(crate) fn transport(name: &str, source: std::io::Error) -> Self {
        RegistryError::Transport {
            name: name.to_string(),
            source,
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
