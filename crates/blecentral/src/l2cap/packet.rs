//! L2CAP packet handling
//!
//! Basic-mode headers for the LE fixed channels and the LE signaling PDUs.

use super::constants::*;
use super::types::*;
use crate::hci::ConnectionParameters;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// L2CAP Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capHeader {
    /// Length of the L2CAP payload in bytes
    pub length: u16,
    /// Channel Identifier
    pub channel_id: u16,
}

impl L2capHeader {
    /// Create a new L2CAP header
    pub fn new(length: u16, channel_id: u16) -> Self {
        Self { length, channel_id }
    }

    /// Parse an L2CAP header from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < L2CAP_BASIC_HEADER_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let length = cursor.read_u16::<LittleEndian>().ok()?;
        let channel_id = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self { length, channel_id })
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; L2CAP_BASIC_HEADER_SIZE] {
        let mut result = [0u8; L2CAP_BASIC_HEADER_SIZE];
        result[0..2].copy_from_slice(&self.length.to_le_bytes());
        result[2..4].copy_from_slice(&self.channel_id.to_le_bytes());
        result
    }
}

/// Signaling command header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capCommandHeader {
    pub code: u8,
    pub identifier: u8,
    pub length: u16,
}

impl L2capCommandHeader {
    pub fn parse(data: &[u8]) -> L2capResult<Self> {
        ensure_len("signaling header", data, L2CAP_SIGNALING_HEADER_SIZE)?;

        Ok(Self {
            code: data[0],
            identifier: data[1],
            length: u16::from_le_bytes([data[2], data[3]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; L2CAP_SIGNALING_HEADER_SIZE] {
        let length = self.length.to_le_bytes();
        [self.code, self.identifier, length[0], length[1]]
    }
}

/// LE signaling channel PDUs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    CommandReject {
        identifier: u8,
        reason: u16,
        data: Vec<u8>,
    },
    ConnectionParameterUpdateRequest {
        identifier: u8,
        parameters: ConnectionParameters,
    },
    ConnectionParameterUpdateResponse {
        identifier: u8,
        result: u16,
    },
    /// Any command this host does not interpret
    Other {
        code: u8,
        identifier: u8,
        data: Vec<u8>,
    },
}

impl SignalingMessage {
    /// Parse a signaling message from raw bytes
    pub fn parse(data: &[u8]) -> L2capResult<Self> {
        let header = L2capCommandHeader::parse(data)?;
        let params = &data[L2CAP_SIGNALING_HEADER_SIZE..];
        ensure_len("signaling parameters", params, header.length as usize)?;
        let params = &params[..header.length as usize];

        match header.code {
            L2CAP_COMMAND_REJECT => {
                ensure_len("Command Reject", params, 2)?;
                Ok(Self::CommandReject {
                    identifier: header.identifier,
                    reason: u16::from_le_bytes([params[0], params[1]]),
                    data: params[2..].to_vec(),
                })
            }
            L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST => {
                ensure_len("Connection Parameter Update Request", params, 8)?;
                let field = |at: usize| u16::from_le_bytes([params[at], params[at + 1]]);
                let parameters = ConnectionParameters {
                    interval_min: field(0),
                    interval_max: field(2),
                    latency: field(4),
                    supervision_timeout: field(6),
                };
                Ok(Self::ConnectionParameterUpdateRequest {
                    identifier: header.identifier,
                    parameters,
                })
            }
            L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE => {
                ensure_len("Connection Parameter Update Response", params, 2)?;
                Ok(Self::ConnectionParameterUpdateResponse {
                    identifier: header.identifier,
                    result: u16::from_le_bytes([params[0], params[1]]),
                })
            }
            code => Ok(Self::Other {
                code,
                identifier: header.identifier,
                data: params.to_vec(),
            }),
        }
    }

    /// Serialize to a signaling channel payload
    pub fn serialize(&self) -> Vec<u8> {
        let (code, identifier, params) = match self {
            Self::CommandReject {
                identifier,
                reason,
                data,
            } => {
                let mut params = reason.to_le_bytes().to_vec();
                params.extend_from_slice(data);
                (L2CAP_COMMAND_REJECT, *identifier, params)
            }
            Self::ConnectionParameterUpdateRequest {
                identifier,
                parameters,
            } => {
                let mut params = Vec::with_capacity(8);
                params.extend_from_slice(&parameters.interval_min.to_le_bytes());
                params.extend_from_slice(&parameters.interval_max.to_le_bytes());
                params.extend_from_slice(&parameters.latency.to_le_bytes());
                params.extend_from_slice(&parameters.supervision_timeout.to_le_bytes());
                (L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST, *identifier, params)
            }
            Self::ConnectionParameterUpdateResponse { identifier, result } => (
                L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE,
                *identifier,
                result.to_le_bytes().to_vec(),
            ),
            Self::Other {
                code,
                identifier,
                data,
            } => (*code, *identifier, data.clone()),
        };

        let header = L2capCommandHeader {
            code,
            identifier,
            length: params.len() as u16,
        };
        let mut packet = header.to_bytes().to_vec();
        packet.extend_from_slice(&params);
        packet
    }
}
