//! Bluetooth HCI (Host Controller Interface) implementation
//!
//! This module provides the HCI packet codec, ACL flow control and the
//! transport seam the host writes through.

pub mod constants;
pub mod flow;
pub mod packet;
pub mod transport;

#[cfg(test)]
mod tests;

pub use flow::{FlowController, L2capFrame};
pub use packet::{
    AclHeader, AddressType, BdAddr, BufferSize, CommandComplete, ConnectionHandle,
    ConnectionParameters, Event, HciCommand, HciEvent, HciPacket, LeConnectionComplete,
    LocalVersion,
};
pub use transport::HciTransport;
