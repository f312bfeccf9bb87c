//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check cross-field requirements (HTTPS listener needs TLS material)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::ProxyConfig;
use crate::crypto::CipherKey;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Default)]
struct Errors(Vec<ValidationError>);

impl Errors {
    fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) {
        if !ok {
            self.0.push(ValidationError {
                field: field.to_string(),
                message: message.into(),
            });
        }
    }

    fn check_addr(&mut self, value: &str, field: &str) {
        if let Err(e) = value.parse::<SocketAddr>() {
            self.check(false, field, format!("'{value}' is not a socket address ({e})"));
        }
    }
}

/// Validate a parsed configuration, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Errors::default();

    let listener = &config.listener;
    errors.check_addr(&listener.bind_address, "listener.bind_address");
    errors.check(listener.max_connections > 0, "listener.max_connections", "must be positive");
    if let Some(https) = &listener.https_bind_address {
        errors.check_addr(https, "listener.https_bind_address");
        errors.check(
            listener.tls.is_some(),
            "listener.tls",
            "required when https_bind_address is set",
        );
    }

    for (i, upstream) in config.upstreams.iter().enumerate() {
        errors.check(!upstream.host.is_empty(), &format!("upstreams[{i}].host"), "must not be empty");
        errors.check(upstream.port != 0, &format!("upstreams[{i}].port"), "must not be 0");
    }

    let connections = &config.connections;
    errors.check(connections.max_concurrent > 0, "connections.max_concurrent", "must be positive");
    errors.check(
        connections.connect_timeout_secs > 0,
        "connections.connect_timeout_secs",
        "must be positive",
    );
    errors.check(connections.keep_alive_secs > 0, "connections.keep_alive_secs", "must be positive");
    errors.check(connections.max_frame_bytes > 0, "connections.max_frame_bytes", "must be positive");

    if config.cache.enabled {
        errors.check(config.cache.capacity > 0, "cache.capacity", "must be positive when the cache is enabled");
    }

    if let Some(key_hex) = &config.cipher.key_hex {
        if let Err(e) = CipherKey::from_hex(key_hex) {
            errors.check(false, "cipher.key_hex", e.to_string());
        }
    }

    errors.check(
        config.timeouts.upstream_request_secs > 0,
        "timeouts.upstream_request_secs",
        "must be positive",
    );

    let retries = &config.retries;
    errors.check(retries.max_attempts >= 1, "retries.max_attempts", "must be at least 1");
    errors.check(
        retries.base_delay_ms <= retries.max_delay_ms,
        "retries.base_delay_ms",
        "must not exceed retries.max_delay_ms",
    );

    let observability = &config.observability;
    if let Err(e) = EnvFilter::try_new(&observability.log_level) {
        errors.check(false, "observability.log_level", e.to_string());
    }
    if observability.metrics_enabled {
        errors.check_addr(&observability.metrics_address, "observability.metrics_address");
    }

    if config.admin.enabled {
        errors.check_addr(&config.admin.bind_address, "admin.bind_address");
        errors.check(!config.admin.api_key.is_empty(), "admin.api_key", "must not be empty");
    }

    if errors.0.is_empty() {
        Ok(())
    } else {
        Err(errors.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;
    use crate::load_balancer::UpstreamTarget;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn https_listener_needs_tls() {
        let mut config = ProxyConfig::default();
        config.listener.https_bind_address = Some("127.0.0.1:8443".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "listener.tls");

        config.listener.tls = Some(TlsConfig {
            cert_path: "cert.pem".into(),
            key_path: "key.pem".into(),
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_all_problems() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.upstreams.push(UpstreamTarget::new("", 0));
        config.cipher.key_hex = Some("abcd".into());
        config.retries.base_delay_ms = 5_000;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "upstreams[0].host",
                "upstreams[0].port",
                "cipher.key_hex",
                "retries.base_delay_ms",
            ]
        );
    }
}
