//! Security Manager Protocol (SMP)
//!
//! LE legacy pairing with Just Works, as the initiator. Produces the short
//! term key the host encrypts the link with and reports any keys the
//! responder distributes.

pub mod constants;
mod crypto;
mod engine;
mod pairing;
mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use self::crypto::{c1, e, s1};
pub use self::engine::SmpPairingEngine;
pub use self::pairing::*;
pub use self::types::*;
