//! Connection registry subsystem.
//!
//! # Data Flow
//! ```text
//! open(name, target) / open_load_balanced(name)
//!     → reserve name (DuplicateName if live)
//!     → admission queue (wait for a slot)
//!     → dialer (TCP / TLS, bounded by the connect timeout)
//!     → Connected + watchdog (keep-alive → Idle, idle timeout → TimedOut)
//!
//! send / receive
//!     → optional cipher framing
//!     → write / read on the owned transport
//!
//! close / error / timeout / peer EOF
//!     → terminal state, entry removed, event emitted, slot released
//! ```
//!
//! # Design Decisions
//! - Callers only ever hold names; the registry owns every socket
//! - A terminal transition happens at most once per connection
//! - No automatic reconnects; retry belongs to the caller

pub mod events;
pub mod manager;

pub use events::{EventBus, EventKind, LifecycleEvent, SubscriptionId};
pub use manager::{ConnectionInfo, ConnectionRegistry, RegistryOptions, WeakConnectionRegistry};
