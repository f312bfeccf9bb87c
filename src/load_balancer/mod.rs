//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! openLoadBalanced() / reverse-mode proxy request
//!     → round_robin.rs (pop front of rotation, push to back)
//!     → target.rs (host + port handed to the dialer)
//! ```
//!
//! # Design Decisions
//! - Rotation is an explicit ordered deque, not an index counter, so
//!   inserting targets never shifts which target is chosen next
//! - Mutation during a cycle is allowed; exact ordering is then best effort
//! - Shared between the connection registry and the proxy

pub mod round_robin;
pub mod target;

pub use round_robin::LoadBalancer;
pub use target::UpstreamTarget;
