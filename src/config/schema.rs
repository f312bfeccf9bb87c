//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::crypto::CipherAlgorithm;
use crate::load_balancer::UpstreamTarget;

/// Root configuration for the wirepool daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind addresses, TLS).
    pub listener: ListenerConfig,

    /// Initial load-balancer rotation, used for reverse-mode requests.
    pub upstreams: Vec<UpstreamTarget>,

    /// Upstream connection registry settings.
    pub connections: ConnectionsConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Payload encryption settings.
    pub cipher: CipherConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Caller-side retry policy.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plain HTTP proxy bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional HTTPS proxy bind address; requires `tls`.
    pub https_bind_address: Option<String>,

    /// Optional TLS configuration for the HTTPS listener.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent inbound connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            https_bind_address: None,
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream connection registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    /// Maximum concurrently open upstream connections.
    pub max_concurrent: usize,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Inactivity before a connection is marked idle, and TCP keep-alive
    /// interval, in seconds.
    pub keep_alive_secs: u64,

    /// Inactivity before a connection is torn down, in seconds (0 disables).
    pub idle_timeout_secs: u64,

    /// Largest accepted encrypted frame in bytes.
    pub max_frame_bytes: usize,

    /// Optional PEM bundle trusted for TLS upstreams in addition to the
    /// webpki roots.
    pub ca_path: Option<String>,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            connect_timeout_secs: 10,
            keep_alive_secs: 60,
            idle_timeout_secs: 300,
            max_frame_bytes: 16 * 1024 * 1024,
            ca_path: None,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Maximum number of cached responses.
    pub capacity: usize,

    /// TTL for responses without a `max-age` directive, in seconds.
    pub default_ttl_secs: u64,

    /// Responses with larger bodies are relayed but not cached.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 500,
            default_ttl_secs: 300,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Payload encryption configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CipherConfig {
    pub algorithm: CipherAlgorithm,

    /// Optional 32-byte key, hex encoded, used by the admin API and CLI.
    pub key_hex: Option<String>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for one forwarded upstream request/response, in seconds.
    pub upstream_request_secs: u64,

    /// How long shutdown waits for in-flight proxy connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upstream_request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
