//! Forward proxy subsystem.
//!
//! # Data Flow
//! ```text
//! client connection (plain or TLS)
//!     → server.rs (listener backpressure, HTTP/1.1 with upgrades)
//!     → request inspection (request id, method, target, headers)
//!     → CONNECT?
//!         yes → tunnel.rs (open upstream, 200, bidirectional relay)
//!         no  → forward.rs
//!                 → response cache lookup (GET / HEAD)
//!                 → upstream: absolute-form target or next load-balanced target
//!                 → cache population per Cache-Control
//! ```
//!
//! # Design Decisions
//! - One upstream attempt per request; failures become 502 / 504
//! - Tunnels are opaque and never touch the cache
//! - Every client connection and tunnel is tracked for graceful shutdown

pub mod error;
mod forward;
pub mod response;
pub mod server;
mod tunnel;

pub use error::{ProxyError, ProxyResult};
pub use server::{ListenerInfo, ProxyOptions, ProxyServer};
