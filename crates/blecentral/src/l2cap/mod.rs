//! L2CAP (Logical Link Control and Adaptation Protocol) for LE fixed channels
//!
//! This module provides:
//! - Basic-mode header and signaling PDU encoding
//! - The LE signaling engine answering peer requests
//! - Per-link routing of ATT, signaling and SMP traffic

pub mod constants;
pub mod packet;
pub mod router;
pub mod signaling;
pub mod types;
#[cfg(test)]
mod tests;

// Re-export the public API
pub use self::packet::{L2capCommandHeader, L2capHeader, SignalingMessage};
pub use self::router::{ChannelRouter, LinkEvent, LinkOutput, OutboundFrame};
pub use self::signaling::SignalingEngine;
pub use self::types::*;
