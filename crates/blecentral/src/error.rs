//! Error types for the blecentral library
//!
//! Each layer carries its own error enum (`HciError`, `L2capError`, `AttError`,
//! `SmpError`). `Error` is the crate-level taxonomy handed to completion
//! callbacks and returned from the `Host` facade.

use crate::att::AttError;
use crate::hci::ConnectionHandle;
use crate::l2cap::L2capError;
use crate::smp::SmpError;
use thiserror::Error;

/// Errors raised by the HCI codec and the controller transport
#[derive(Error, Debug)]
pub enum HciError {
    #[error("Transport I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed")]
    Closed,

    #[error("Truncated {what}: need {needed} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("Unknown HCI packet type 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("Invalid parameter length: {0}")]
    InvalidParamLength(usize),

    #[error("Invalid HCI packet format")]
    InvalidPacketFormat,
}

/// Malformed or out-of-sequence traffic from the peer.
///
/// The offending PDU or procedure step is dropped; the link survives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Prepare write echo mismatch on handle 0x{handle:04x} at offset {offset}")]
    EchoMismatch { handle: u16, offset: u16 },

    #[error("Malformed {0} PDU")]
    Malformed(&'static str),

    #[error("Unexpected opcode 0x{0:02x}")]
    UnexpectedOpcode(u8),
}

/// Crate-level error taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// Controller transport failure. Fatal to the whole host.
    #[error("Transport failure: {0}")]
    Transport(#[from] HciError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Attribute error returned by the peer
    #[error(transparent)]
    Att(#[from] AttError),

    #[error(transparent)]
    L2cap(#[from] L2capError),

    /// Pairing failed, or the peer rejected pairing
    #[error("Security failure: {0}")]
    Security(#[from] SmpError),

    #[error("Connection {0} disconnected")]
    Disconnected(ConnectionHandle),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionHandle),

    #[error("Unknown attribute handle 0x{0:04x}")]
    UnknownAttribute(u16),

    /// Rejected before anything was sent
    #[error("Attribute value of {0} bytes is longer than 512")]
    ValueTooLong(usize),

    #[error("Host stopped after a transport failure")]
    Stopped,
}

/// Result type for facade operations
pub type Result<T> = std::result::Result<T, Error>;
