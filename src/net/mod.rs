//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound (connection registry, proxy upstreams):
//!     → dialer.rs (TCP connect, keep-alive, optional TLS handshake)
//!     → tls.rs (client roots, server names)
//!
//! Inbound (proxy listeners):
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (tracking for graceful shutdown)
//!
//! Upstream connection states:
//!     Connecting → Connected → Idle → Closed | Errored | TimedOut
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each inbound connection tracked for graceful shutdown
//! - TLS is optional and handled transparently behind `BoxedStream`

pub mod connection;
pub mod dialer;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionId, ConnectionState};
pub use dialer::{BoxedStream, Dialer, TransportKind};
