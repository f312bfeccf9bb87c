//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Caller operation (e.g. admin API open):
//!     → retry.rs (attempt, classify error)
//!     → backoff.rs (exponential delay with jitter)
//!     → next attempt, or the last error returned to the caller
//! ```
//!
//! # Design Decisions
//! - Retries are opt-in and bounded; the core never retries by itself
//! - Only errors the caller classifies as transient are retried
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod retry;

pub use backoff::Backoff;
pub use retry::{retry_with_backoff, RetryPolicy};
