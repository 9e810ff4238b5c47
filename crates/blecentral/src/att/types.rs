//! ATT PDU codec
//!
//! One struct per PDU the client sends or receives. Each implements
//! [`AttPacket`]; parsing checks the opcode and length and never panics on
//! short input.

use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// ATT packet formats
pub trait AttPacket: Sized {
    /// Opcode for this packet
    fn opcode() -> u8;

    /// Parse packet from bytes, opcode included
    fn parse(data: &[u8]) -> AttResult<Self>;

    /// Serialize packet to bytes, opcode included
    fn serialize(&self) -> Vec<u8>;
}

/// Validate opcode and minimum length, returning a cursor past the opcode
fn body<'a, P: AttPacket>(data: &'a [u8], min_len: usize) -> AttResult<Cursor<&'a [u8]>> {
    match data.first() {
        None => Err(AttError::InvalidPdu),
        Some(&opcode) if opcode != P::opcode() => Err(AttError::UnexpectedOpcode {
            expected: P::opcode(),
            actual: opcode,
        }),
        Some(_) if data.len() < min_len => Err(AttError::InvalidPdu),
        Some(_) => Ok(Cursor::new(&data[1..])),
    }
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> AttResult<u16> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| AttError::InvalidPdu)
}

fn remaining(cursor: &Cursor<&[u8]>) -> Vec<u8> {
    let data = *cursor.get_ref();
    data[(cursor.position() as usize).min(data.len())..].to_vec()
}

/// Whether an opcode is a request a server would have to answer
pub fn is_request(opcode: u8) -> bool {
    opcode & ATT_OPCODE_COMMAND_FLAG == 0
        && matches!(
            opcode,
            ATT_EXCHANGE_MTU_REQ
                | ATT_FIND_INFO_REQ
                | ATT_FIND_BY_TYPE_VALUE_REQ
                | ATT_READ_BY_TYPE_REQ
                | ATT_READ_REQ
                | ATT_READ_BLOB_REQ
                | ATT_READ_MULTIPLE_REQ
                | ATT_READ_BY_GROUP_TYPE_REQ
                | ATT_WRITE_REQ
                | ATT_PREPARE_WRITE_REQ
                | ATT_EXECUTE_WRITE_REQ
                | ATT_READ_MULTIPLE_VARIABLE_REQ
        )
}

/// Whether an opcode has the command flag set (no response is ever sent)
pub fn is_command(opcode: u8) -> bool {
    opcode & ATT_OPCODE_COMMAND_FLAG != 0
}

/// Error response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Request opcode in error
    pub request_opcode: u8,
    /// Attribute handle in error
    pub handle: u16,
    pub error_code: AttErrorCode,
}

impl AttPacket for ErrorResponse {
    fn opcode() -> u8 {
        ATT_ERROR_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 5)?;
        let request_opcode = cursor.read_u8().map_err(|_| AttError::InvalidPdu)?;
        let handle = read_u16(&mut cursor)?;
        let error_code = cursor.read_u8().map_err(|_| AttError::InvalidPdu)?.into();

        Ok(Self {
            request_opcode,
            handle,
            error_code,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.request_opcode];
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.push(self.error_code.into());
        packet
    }
}

impl ErrorResponse {
    pub fn into_error(self) -> AttError {
        AttError::Peer {
            request_opcode: self.request_opcode,
            handle: self.handle,
            code: self.error_code,
        }
    }
}

/// Exchange MTU Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMtuRequest {
    /// Client Rx MTU size
    pub client_mtu: u16,
}

impl AttPacket for ExchangeMtuRequest {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 3)?;
        Ok(Self {
            client_mtu: read_u16(&mut cursor)?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.client_mtu.to_le_bytes());
        packet
    }
}

/// Exchange MTU Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMtuResponse {
    /// Server Rx MTU size
    pub server_mtu: u16,
}

impl AttPacket for ExchangeMtuResponse {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 3)?;
        Ok(Self {
            server_mtu: read_u16(&mut cursor)?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.server_mtu.to_le_bytes());
        packet
    }
}

/// Find Information Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationRequest {
    pub start_handle: u16,
    pub end_handle: u16,
}

impl AttPacket for FindInformationRequest {
    fn opcode() -> u8 {
        ATT_FIND_INFO_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 5)?;
        Ok(Self {
            start_handle: read_u16(&mut cursor)?,
            end_handle: read_u16(&mut cursor)?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet
    }
}

/// One handle/type pair of a Find Information Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleUuid {
    pub handle: u16,
    pub uuid: Uuid,
}

/// Find Information Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationResponse {
    /// 0x01 for 16-bit UUIDs, 0x02 for 128-bit
    pub format: u8,
    pub information_data: Vec<HandleUuid>,
}

impl AttPacket for FindInformationResponse {
    fn opcode() -> u8 {
        ATT_FIND_INFO_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        body::<Self>(data, 2)?;
        let format = data[1];
        let record_len = match format {
            ATT_FIND_INFO_RSP_FORMAT_16BIT => 4,
            ATT_FIND_INFO_RSP_FORMAT_128BIT => 18,
            other => return Err(AttError::InvalidFormat(other)),
        };

        let information_data = data[2..]
            .chunks_exact(record_len)
            .map(|record| {
                let uuid = Uuid::from_le_slice(&record[2..]).ok_or(AttError::InvalidPdu)?;
                Ok(HandleUuid {
                    handle: u16::from_le_bytes([record[0], record[1]]),
                    uuid,
                })
            })
            .collect::<AttResult<Vec<_>>>()?;

        Ok(Self {
            format,
            information_data,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.format];
        for pair in &self.information_data {
            packet.extend_from_slice(&pair.handle.to_le_bytes());
            packet.extend_from_slice(&pair.uuid.to_le_bytes());
        }
        packet
    }
}

/// Read By Type Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub attribute_type: Uuid,
}

impl AttPacket for ReadByTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 7)?;
        let start_handle = read_u16(&mut cursor)?;
        let end_handle = read_u16(&mut cursor)?;
        let attribute_type = Uuid::from_le_slice(&data[5..]).ok_or(AttError::InvalidPdu)?;

        Ok(Self {
            start_handle,
            end_handle,
            attribute_type,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.attribute_type.to_le_bytes());
        packet
    }
}

/// One record of a Read By Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Read By Type Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeResponse {
    /// Size of each handle/value record
    pub length: u8,
    pub data: Vec<HandleValue>,
}

impl AttPacket for ReadByTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        body::<Self>(data, 2)?;
        let length = data[1];
        if length < 2 {
            return Err(AttError::InvalidPdu);
        }

        let records = data[2..]
            .chunks_exact(length as usize)
            .map(|record| HandleValue {
                handle: u16::from_le_bytes([record[0], record[1]]),
                value: record[2..].to_vec(),
            })
            .collect();

        Ok(Self {
            length,
            data: records,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.length];
        for item in &self.data {
            packet.extend_from_slice(&item.handle.to_le_bytes());
            packet.extend_from_slice(&item.value);
        }
        packet
    }
}

/// Read Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub handle: u16,
}

impl AttPacket for ReadRequest {
    fn opcode() -> u8 {
        ATT_READ_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 3)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet
    }
}

/// Read Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub value: Vec<u8>,
}

impl AttPacket for ReadResponse {
    fn opcode() -> u8 {
        ATT_READ_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let cursor = body::<Self>(data, 1)?;
        Ok(Self {
            value: remaining(&cursor),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read Blob Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobRequest {
    pub handle: u16,
    pub offset: u16,
}

impl AttPacket for ReadBlobRequest {
    fn opcode() -> u8 {
        ATT_READ_BLOB_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 5)?;
        Ok(Self {
            handle: read_u16(&mut cursor)?,
            offset: read_u16(&mut cursor)?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet
    }
}

/// Read Blob Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobResponse {
    pub value: Vec<u8>,
}

impl AttPacket for ReadBlobResponse {
    fn opcode() -> u8 {
        ATT_READ_BLOB_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let cursor = body::<Self>(data, 1)?;
        Ok(Self {
            value: remaining(&cursor),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read By Group Type Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub group_type: Uuid,
}

impl AttPacket for ReadByGroupTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 7)?;
        let start_handle = read_u16(&mut cursor)?;
        let end_handle = read_u16(&mut cursor)?;
        let group_type = Uuid::from_le_slice(&data[5..]).ok_or(AttError::InvalidPdu)?;

        Ok(Self {
            start_handle,
            end_handle,
            group_type,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.group_type.to_le_bytes());
        packet
    }
}

/// One record of a Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeData {
    pub handle: u16,
    pub end_group_handle: u16,
    pub value: Vec<u8>,
}

/// Read By Group Type Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeResponse {
    /// Size of each record
    pub length: u8,
    pub data: Vec<AttributeData>,
}

impl AttPacket for ReadByGroupTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        body::<Self>(data, 2)?;
        let length = data[1];
        if length < 4 {
            return Err(AttError::InvalidPdu);
        }

        let records = data[2..]
            .chunks_exact(length as usize)
            .map(|record| AttributeData {
                handle: u16::from_le_bytes([record[0], record[1]]),
                end_group_handle: u16::from_le_bytes([record[2], record[3]]),
                value: record[4..].to_vec(),
            })
            .collect();

        Ok(Self {
            length,
            data: records,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.length];
        for item in &self.data {
            packet.extend_from_slice(&item.handle.to_le_bytes());
            packet.extend_from_slice(&item.end_group_handle.to_le_bytes());
            packet.extend_from_slice(&item.value);
        }
        packet
    }
}

/// Write Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for WriteRequest {
    fn opcode() -> u8 {
        ATT_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 3)?;
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: remaining(&cursor),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Write Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse;

impl AttPacket for WriteResponse {
    fn opcode() -> u8 {
        ATT_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        body::<Self>(data, 1)?;
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Write Command packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for WriteCommand {
    fn opcode() -> u8 {
        ATT_WRITE_CMD
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 3)?;
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: remaining(&cursor),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Prepare Write Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareWriteRequest {
    pub handle: u16,
    pub offset: u16,
    /// Part of the value to write
    pub value: Vec<u8>,
}

impl AttPacket for PrepareWriteRequest {
    fn opcode() -> u8 {
        ATT_PREPARE_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 5)?;
        let handle = read_u16(&mut cursor)?;
        let offset = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            offset,
            value: remaining(&cursor),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Prepare Write Response packet, an echo of the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareWriteResponse {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

impl AttPacket for PrepareWriteResponse {
    fn opcode() -> u8 {
        ATT_PREPARE_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 5)?;
        let handle = read_u16(&mut cursor)?;
        let offset = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            offset,
            value: remaining(&cursor),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Execute Write Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteWriteRequest {
    /// 0x00 cancels the prepared writes, 0x01 commits them
    pub flags: u8,
}

impl AttPacket for ExecuteWriteRequest {
    fn opcode() -> u8 {
        ATT_EXECUTE_WRITE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        body::<Self>(data, 2)?;
        Ok(Self { flags: data[1] })
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode(), self.flags]
    }
}

/// Execute Write Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteWriteResponse;

impl AttPacket for ExecuteWriteResponse {
    fn opcode() -> u8 {
        ATT_EXECUTE_WRITE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        body::<Self>(data, 1)?;
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Handle Value Notification packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueNotification {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for HandleValueNotification {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_NTF
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 3)?;
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: remaining(&cursor),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Indication packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueIndication {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for HandleValueIndication {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_IND
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = body::<Self>(data, 3)?;
        let handle = read_u16(&mut cursor)?;
        Ok(Self {
            handle,
            value: remaining(&cursor),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Confirmation packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueConfirmation;

impl AttPacket for HandleValueConfirmation {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_CONF
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        body::<Self>(data, 1)?;
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}
