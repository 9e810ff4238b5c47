//! Error handling for the ATT protocol
use super::constants::*;
use thiserror::Error;

/// Error codes carried by an ATT Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    Unlikely,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    DatabaseOutOfSync,
    ValueNotAllowed,
    /// 0x80..=0x9F, defined by the higher layer
    Application(u8),
    /// 0xE0..=0xFF, defined by a profile
    CommonProfile(u8),
    /// Reserved value
    Reserved(u8),
}

const CODE_TABLE: [(u8, AttErrorCode); 19] = [
    (ATT_ERROR_INVALID_HANDLE, AttErrorCode::InvalidHandle),
    (ATT_ERROR_READ_NOT_PERMITTED, AttErrorCode::ReadNotPermitted),
    (ATT_ERROR_WRITE_NOT_PERMITTED, AttErrorCode::WriteNotPermitted),
    (ATT_ERROR_INVALID_PDU, AttErrorCode::InvalidPdu),
    (ATT_ERROR_INSUFFICIENT_AUTHENTICATION, AttErrorCode::InsufficientAuthentication),
    (ATT_ERROR_REQUEST_NOT_SUPPORTED, AttErrorCode::RequestNotSupported),
    (ATT_ERROR_INVALID_OFFSET, AttErrorCode::InvalidOffset),
    (ATT_ERROR_INSUFFICIENT_AUTHORIZATION, AttErrorCode::InsufficientAuthorization),
    (ATT_ERROR_PREPARE_QUEUE_FULL, AttErrorCode::PrepareQueueFull),
    (ATT_ERROR_ATTRIBUTE_NOT_FOUND, AttErrorCode::AttributeNotFound),
    (ATT_ERROR_ATTRIBUTE_NOT_LONG, AttErrorCode::AttributeNotLong),
    (ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE, AttErrorCode::InsufficientEncryptionKeySize),
    (ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH, AttErrorCode::InvalidAttributeValueLength),
    (ATT_ERROR_UNLIKELY, AttErrorCode::Unlikely),
    (ATT_ERROR_INSUFFICIENT_ENCRYPTION, AttErrorCode::InsufficientEncryption),
    (ATT_ERROR_UNSUPPORTED_GROUP_TYPE, AttErrorCode::UnsupportedGroupType),
    (ATT_ERROR_INSUFFICIENT_RESOURCES, AttErrorCode::InsufficientResources),
    (ATT_ERROR_DATABASE_OUT_OF_SYNC, AttErrorCode::DatabaseOutOfSync),
    (ATT_ERROR_VALUE_NOT_ALLOWED, AttErrorCode::ValueNotAllowed),
];

impl From<u8> for AttErrorCode {
    fn from(value: u8) -> Self {
        if let Some((_, code)) = CODE_TABLE.iter().find(|(raw, _)| *raw == value) {
            return *code;
        }
        match value {
            ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END => {
                AttErrorCode::Application(value)
            }
            ATT_ERROR_COMMON_PROFILE_ERROR_START..=ATT_ERROR_COMMON_PROFILE_ERROR_END => {
                AttErrorCode::CommonProfile(value)
            }
            _ => AttErrorCode::Reserved(value),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> u8 {
        match code {
            AttErrorCode::Application(raw)
            | AttErrorCode::CommonProfile(raw)
            | AttErrorCode::Reserved(raw) => raw,
            known => CODE_TABLE
                .iter()
                .find(|(_, c)| *c == known)
                .map(|(raw, _)| *raw)
                .unwrap_or(ATT_ERROR_UNLIKELY),
        }
    }
}

impl AttErrorCode {
    /// Codes that mean the link must be encrypted before the peer will answer
    pub fn requires_encryption(&self) -> bool {
        matches!(
            self,
            AttErrorCode::InsufficientAuthentication
                | AttErrorCode::InsufficientAuthorization
                | AttErrorCode::InsufficientEncryption
        )
    }
}

/// ATT Error type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttError {
    /// Error Response returned by the peer
    #[error("ATT error: {code:?} for request 0x{request_opcode:02x} on handle 0x{handle:04x}")]
    Peer {
        request_opcode: u8,
        handle: u16,
        code: AttErrorCode,
    },

    #[error("Invalid PDU")]
    InvalidPdu,

    #[error("Unexpected opcode 0x{actual:02x}, expected 0x{expected:02x}")]
    UnexpectedOpcode { expected: u8, actual: u8 },

    #[error("Unsupported Find Information format 0x{0:02x}")]
    InvalidFormat(u8),
}

impl AttError {
    /// The peer's error code, if this error came from an Error Response
    pub fn code(&self) -> Option<AttErrorCode> {
        match self {
            AttError::Peer { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// ATT Result type
pub type AttResult<T> = Result<T, AttError>;
