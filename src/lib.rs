//! wirepool: pooled upstream connections and a caching forward proxy.
//!
//! The library exposes the connection core (admission, load balancing,
//! registry, payload encryption) and the proxy layer (response cache,
//! forward path, CONNECT tunnels). The `wirepool` binary wires them to a
//! config file, metrics and an admin API.

pub mod admin;
pub mod admission;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod registry;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use error::{RegistryError, RegistryResult};
pub use lifecycle::Shutdown;
pub use proxy::ProxyServer;
pub use registry::ConnectionRegistry;
