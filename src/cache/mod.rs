//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! forward request (GET / HEAD)
//!     → store.rs get(method, target)
//!         hit  → served without contacting upstream
//!         miss → upstream fetch
//!     → directive.rs (Cache-Control on the upstream response)
//!         no-store / private / max-age=0 → invalidate
//!         max-age=N                      → put with TTL N
//!         nothing                        → put with default TTL
//! ```
//!
//! # Design Decisions
//! - Advisory only: a flush never changes what a client receives
//! - One mutex around the LRU, held only for the map operation

pub mod directive;
pub mod store;

pub use directive::CacheDirective;
pub use store::{CacheKey, CacheStats, CachedResponse, ResponseCache};
