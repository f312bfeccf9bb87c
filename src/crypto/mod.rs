//! Payload encryption framing.
//!
//! # Data Flow
//! ```text
//! send(name, payload, key)
//!     → cipher.rs encrypt (fresh random IV, AEAD seal)
//!     → envelope.rs (iv || tag || ciphertext)
//!     → registry writes one length-prefixed frame
//!
//! receive(name, key)
//!     → registry reads one frame
//!     → envelope.rs parse
//!     → cipher.rs decrypt (tag verified before any plaintext is returned)
//! ```
//!
//! # Design Decisions
//! - Only authenticated modes; tampering and wrong keys are always detected
//! - Callers never choose IVs; every encryption draws a new one from the OS RNG

pub mod cipher;
pub mod envelope;

pub use cipher::{CipherAlgorithm, CipherCodec, CipherError, CipherKey};
pub use envelope::CipherEnvelope;
