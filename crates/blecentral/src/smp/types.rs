//! Type definitions for the Security Manager Protocol
use super::constants::*;
use std::fmt;
use thiserror::Error;

/// SMP Error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmpError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("Unexpected SMP command 0x{0:02x}")]
    UnexpectedCommand(u8),

    #[error("Confirm value failed")]
    ConfirmValueFailed,

    /// Pairing Failed received from the peer
    #[error("Pairing failed by peer: {0}")]
    PairingFailed(FailureReason),

    #[error("Pairing already in progress")]
    PairingInProgress,

    /// Controller reported that the link could not be encrypted
    #[error("Encryption failed, status 0x{0:02x}")]
    EncryptionFailed(u8),
}

/// Result type for SMP operations
pub type SmpResult<T> = Result<T, SmpError>;

/// Reason carried by a Pairing Failed PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    ConfirmValueFailed,
    PairingNotSupported,
    EncryptionKeySize,
    CommandNotSupported,
    UnspecifiedReason,
    RepeatedAttempts,
    InvalidParameters,
    Other(u8),
}

impl From<u8> for FailureReason {
    fn from(value: u8) -> Self {
        match value {
            SMP_REASON_PASSKEY_ENTRY_FAILED => FailureReason::PasskeyEntryFailed,
            SMP_REASON_OOB_NOT_AVAILABLE => FailureReason::OobNotAvailable,
            SMP_REASON_AUTHENTICATION_REQUIREMENTS => FailureReason::AuthenticationRequirements,
            SMP_REASON_CONFIRM_VALUE_FAILED => FailureReason::ConfirmValueFailed,
            SMP_REASON_PAIRING_NOT_SUPPORTED => FailureReason::PairingNotSupported,
            SMP_REASON_ENCRYPTION_KEY_SIZE => FailureReason::EncryptionKeySize,
            SMP_REASON_COMMAND_NOT_SUPPORTED => FailureReason::CommandNotSupported,
            SMP_REASON_UNSPECIFIED_REASON => FailureReason::UnspecifiedReason,
            SMP_REASON_REPEATED_ATTEMPTS => FailureReason::RepeatedAttempts,
            SMP_REASON_INVALID_PARAMETERS => FailureReason::InvalidParameters,
            other => FailureReason::Other(other),
        }
    }
}

impl From<FailureReason> for u8 {
    fn from(reason: FailureReason) -> u8 {
        match reason {
            FailureReason::PasskeyEntryFailed => SMP_REASON_PASSKEY_ENTRY_FAILED,
            FailureReason::OobNotAvailable => SMP_REASON_OOB_NOT_AVAILABLE,
            FailureReason::AuthenticationRequirements => SMP_REASON_AUTHENTICATION_REQUIREMENTS,
            FailureReason::ConfirmValueFailed => SMP_REASON_CONFIRM_VALUE_FAILED,
            FailureReason::PairingNotSupported => SMP_REASON_PAIRING_NOT_SUPPORTED,
            FailureReason::EncryptionKeySize => SMP_REASON_ENCRYPTION_KEY_SIZE,
            FailureReason::CommandNotSupported => SMP_REASON_COMMAND_NOT_SUPPORTED,
            FailureReason::UnspecifiedReason => SMP_REASON_UNSPECIFIED_REASON,
            FailureReason::RepeatedAttempts => SMP_REASON_REPEATED_ATTEMPTS,
            FailureReason::InvalidParameters => SMP_REASON_INVALID_PARAMETERS,
            FailureReason::Other(raw) => raw,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Other(raw) => write!(f, "reason 0x{:02x}", raw),
            known => write!(f, "{:?}", known),
        }
    }
}

/// IO Capability types for pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    /// No input, no output. The only capability that keeps pairing Just Works.
    NoInputNoOutput,
    KeyboardDisplay,
}

impl IoCapability {
    /// Convert to u8 value for protocol
    pub fn to_u8(&self) -> u8 {
        match self {
            IoCapability::DisplayOnly => SMP_IO_CAPABILITY_DISPLAY_ONLY,
            IoCapability::DisplayYesNo => SMP_IO_CAPABILITY_DISPLAY_YES_NO,
            IoCapability::KeyboardOnly => SMP_IO_CAPABILITY_KEYBOARD_ONLY,
            IoCapability::NoInputNoOutput => SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT,
            IoCapability::KeyboardDisplay => SMP_IO_CAPABILITY_KEYBOARD_DISPLAY,
        }
    }

    /// Convert from u8 value from protocol
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            SMP_IO_CAPABILITY_DISPLAY_ONLY => Some(IoCapability::DisplayOnly),
            SMP_IO_CAPABILITY_DISPLAY_YES_NO => Some(IoCapability::DisplayYesNo),
            SMP_IO_CAPABILITY_KEYBOARD_ONLY => Some(IoCapability::KeyboardOnly),
            SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT => Some(IoCapability::NoInputNoOutput),
            SMP_IO_CAPABILITY_KEYBOARD_DISPLAY => Some(IoCapability::KeyboardDisplay),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Authentication requirements field
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuthRequirements: u8 {
        const BONDING = 0x01;
        const MITM = 0x04;
        const SECURE_CONNECTIONS = 0x08;
        const KEYPRESS = 0x10;
        const CT2 = 0x20;
    }
}

bitflags::bitflags! {
    /// Key distribution field
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyDistribution: u8 {
        /// LTK, EDIV and Rand
        const ENC_KEY = 0x01;
        /// IRK and identity address
        const ID_KEY = 0x02;
        /// CSRK
        const SIGN_KEY = 0x04;
        const LINK_KEY = 0x08;
    }
}

/// Addresses mixed into the confirm value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingAddresses {
    /// Initiator (local) address type, 0 public or 1 random
    pub initiator_type: u8,
    /// Initiator address, little-endian as on the wire
    pub initiator: [u8; 6],
    pub responder_type: u8,
    pub responder: [u8; 6],
}

/// Progress of a pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    RequestSent,
    ConfirmSent,
    RandomSent,
    /// STK delivered, waiting for the controller to encrypt the link
    StkReady,
    Failed,
}

/// Pairing outcomes reported to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpEvent {
    /// Short term key ready; the link can be encrypted with it
    Stk([u8; 16]),
    /// Long term key distributed by the responder
    Ltk([u8; 16]),
    /// EDIV and Rand identifying the distributed LTK
    MasterIdentification { ediv: u16, rand: [u8; 8] },
    Failed(SmpError),
}
