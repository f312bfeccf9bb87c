//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! open() / forward request
//!     → queue.rs acquire()
//!         running < max  → permit granted immediately
//!         running == max → caller parked in FIFO wait-list
//!     → permit held for the resource lifetime
//!     → permit dropped → slot handed to the oldest waiter
//! ```
//!
//! # Design Decisions
//! - One counter + one wait-list behind a single mutex, never held across I/O
//! - A freed slot is handed over directly, so `running` never exceeds `max`
//! - Permits are RAII: a failed open still returns its slot when dropped

pub mod queue;

pub use queue::{AdmissionPermit, AdmissionQueue};
