//! Attribute Protocol (ATT)
//!
//! PDU encoding and decoding for the client side of ATT. Transactions over
//! these PDUs live in [`crate::gatt`].

pub mod constants;
pub mod error;
pub mod types;

#[cfg(test)]
mod tests;

pub use self::constants::*;
pub use self::error::{AttError, AttErrorCode, AttResult};
pub use self::types::*;
