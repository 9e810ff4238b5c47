//! HCI packet structures and parsing
//!
//! Commands issued by the host, events and ACL data received from the
//! controller, and the typed views the host acts upon.

use crate::error::HciError;
use crate::hci::constants::*;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;

/// Identifier of an established LE link (12-bit HCI connection handle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u16);

impl ConnectionHandle {
    pub fn raw(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Bluetooth device address, stored in wire (little-endian) order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// LE address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

impl AddressType {
    pub fn to_u8(self) -> u8 {
        match self {
            AddressType::Public => 0x00,
            AddressType::Random => 0x01,
        }
    }

    /// Identity and resolvable variants collapse onto public/random.
    pub fn from_u8(value: u8) -> Self {
        if value & 0x01 == 0 {
            AddressType::Public
        } else {
            AddressType::Random
        }
    }
}

/// LE connection parameters, in controller units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParameters {
    /// Minimum connection interval (1.25 ms units)
    pub interval_min: u16,
    /// Maximum connection interval (1.25 ms units)
    pub interval_max: u16,
    /// Peripheral latency in connection events
    pub latency: u16,
    /// Supervision timeout (10 ms units)
    pub supervision_timeout: u16,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            interval_min: 0x0006,
            interval_max: 0x000C,
            latency: 0x0000,
            supervision_timeout: 0x00C8,
        }
    }
}

/// Commands the host issues to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HciCommand {
    Disconnect {
        handle: ConnectionHandle,
        reason: u8,
    },
    Reset,
    SetEventMask {
        event_mask: u64,
    },
    ReadLocalVersion,
    ReadBufferSize,
    ReadBdAddr,
    LeSetEventMask {
        event_mask: u64,
    },
    LeReadBufferSize,
    LeCreateConnection {
        scan_interval: u16,
        scan_window: u16,
        peer_addr_type: AddressType,
        peer_addr: BdAddr,
        own_addr_type: AddressType,
        parameters: ConnectionParameters,
    },
    LeCreateConnectionCancel,
    LeConnectionUpdate {
        handle: ConnectionHandle,
        parameters: ConnectionParameters,
    },
    LeStartEncryption {
        handle: ConnectionHandle,
        random: [u8; 8],
        ediv: u16,
        ltk: [u8; 16],
    },
}

impl HciCommand {
    /// Get the OGF and OCF for this command
    pub fn opcode_parts(&self) -> (u8, u16) {
        match self {
            Self::Disconnect { .. } => (OGF_LINK_CTL, OCF_DISCONNECT),
            Self::Reset => (OGF_HOST_CTL, OCF_RESET),
            Self::SetEventMask { .. } => (OGF_HOST_CTL, OCF_SET_EVENT_MASK),
            Self::ReadLocalVersion => (OGF_INFO_PARAM, OCF_READ_LOCAL_VERSION),
            Self::ReadBufferSize => (OGF_INFO_PARAM, OCF_READ_BUFFER_SIZE),
            Self::ReadBdAddr => (OGF_INFO_PARAM, OCF_READ_BD_ADDR),
            Self::LeSetEventMask { .. } => (OGF_LE, OCF_LE_SET_EVENT_MASK),
            Self::LeReadBufferSize => (OGF_LE, OCF_LE_READ_BUFFER_SIZE),
            Self::LeCreateConnection { .. } => (OGF_LE, OCF_LE_CREATE_CONNECTION),
            Self::LeCreateConnectionCancel => (OGF_LE, OCF_LE_CREATE_CONNECTION_CANCEL),
            Self::LeConnectionUpdate { .. } => (OGF_LE, OCF_LE_CONNECTION_UPDATE),
            Self::LeStartEncryption { .. } => (OGF_LE, OCF_LE_START_ENCRYPTION),
        }
    }

    /// Packed 16-bit opcode
    pub fn opcode(&self) -> u16 {
        let (ogf, ocf) = self.opcode_parts();
        opcode(ogf, ocf)
    }

    fn parameters(&self) -> Vec<u8> {
        match self {
            Self::Reset
            | Self::ReadLocalVersion
            | Self::ReadBufferSize
            | Self::ReadBdAddr
            | Self::LeReadBufferSize
            | Self::LeCreateConnectionCancel => vec![],

            Self::Disconnect { handle, reason } => {
                let mut params = Vec::with_capacity(3);
                params.extend_from_slice(&handle.0.to_le_bytes());
                params.push(*reason);
                params
            }

            Self::SetEventMask { event_mask } | Self::LeSetEventMask { event_mask } => {
                event_mask.to_le_bytes().to_vec()
            }

            Self::LeCreateConnection {
                scan_interval,
                scan_window,
                peer_addr_type,
                peer_addr,
                own_addr_type,
                parameters,
            } => {
                let mut params = Vec::with_capacity(25);
                params.extend_from_slice(&scan_interval.to_le_bytes());
                params.extend_from_slice(&scan_window.to_le_bytes());
                params.push(0x00); // initiator filter policy: use peer address
                params.push(peer_addr_type.to_u8());
                params.extend_from_slice(&peer_addr.0);
                params.push(own_addr_type.to_u8());
                push_connection_parameters(&mut params, parameters);
                params
            }

            Self::LeConnectionUpdate { handle, parameters } => {
                let mut params = Vec::with_capacity(14);
                params.extend_from_slice(&handle.0.to_le_bytes());
                push_connection_parameters(&mut params, parameters);
                params
            }

            Self::LeStartEncryption {
                handle,
                random,
                ediv,
                ltk,
            } => {
                let mut params = Vec::with_capacity(28);
                params.extend_from_slice(&handle.0.to_le_bytes());
                params.extend_from_slice(random);
                params.extend_from_slice(&ediv.to_le_bytes());
                params.extend_from_slice(ltk);
                params
            }
        }
    }

    /// Convert the command to a raw HCI packet
    pub fn to_packet(&self) -> Vec<u8> {
        let params = self.parameters();

        let mut packet = Vec::with_capacity(1 + HCI_COMMAND_HEADER_SIZE + params.len());
        packet.push(HCI_COMMAND_PKT);
        packet.extend_from_slice(&self.opcode().to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(&params);
        packet
    }
}

fn push_connection_parameters(params: &mut Vec<u8>, parameters: &ConnectionParameters) {
    params.extend_from_slice(&parameters.interval_min.to_le_bytes());
    params.extend_from_slice(&parameters.interval_max.to_le_bytes());
    params.extend_from_slice(&parameters.latency.to_le_bytes());
    params.extend_from_slice(&parameters.supervision_timeout.to_le_bytes());
    params.extend_from_slice(&0x0004u16.to_le_bytes()); // min CE length
    params.extend_from_slice(&0x0006u16.to_le_bytes()); // max CE length
}

/// Pack an OGF/OCF pair into a command opcode
pub const fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | (ocf & 0x03FF)
}

fn ensure_len(what: &'static str, data: &[u8], needed: usize) -> Result<(), HciError> {
    if data.len() < needed {
        return Err(HciError::Truncated {
            what,
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

/// ACL data packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclHeader {
    pub handle: ConnectionHandle,
    /// Packet boundary and broadcast flags (upper 4 bits of the handle field)
    pub flags: u8,
    pub length: u16,
}

impl AclHeader {
    pub fn new(handle: ConnectionHandle, flags: u8, length: u16) -> Self {
        Self {
            handle,
            flags,
            length,
        }
    }

    /// Parse the 4-byte header (packet-type octet already stripped)
    pub fn parse(data: &[u8]) -> Result<Self, HciError> {
        ensure_len("ACL header", data, HCI_ACL_HEADER_SIZE)?;

        let mut cursor = Cursor::new(data);
        let handle_flags = cursor.read_u16::<LittleEndian>()?;
        let length = cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            handle: ConnectionHandle(handle_flags & ACL_HANDLE_MASK),
            flags: (handle_flags >> 12) as u8,
            length,
        })
    }

    pub fn to_bytes(&self) -> [u8; HCI_ACL_HEADER_SIZE] {
        let handle_flags = (self.handle.0 & ACL_HANDLE_MASK) | ((self.flags as u16 & 0x0F) << 12);
        let mut bytes = [0u8; HCI_ACL_HEADER_SIZE];
        bytes[0..2].copy_from_slice(&handle_flags.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }
}

/// HCI Event packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciEvent {
    pub event_code: u8,
    pub parameters: Vec<u8>,
}

impl HciEvent {
    /// Parse an HCI event from raw bytes (packet-type octet stripped)
    pub fn parse(data: &[u8]) -> Result<Self, HciError> {
        ensure_len("event header", data, HCI_EVENT_HEADER_SIZE)?;

        let event_code = data[0];
        let parameter_total_length = data[1] as usize;
        ensure_len("event", data, HCI_EVENT_HEADER_SIZE + parameter_total_length)?;

        Ok(HciEvent {
            event_code,
            parameters: data[2..2 + parameter_total_length].to_vec(),
        })
    }

    pub fn to_packet(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + HCI_EVENT_HEADER_SIZE + self.parameters.len());
        packet.push(HCI_EVENT_PKT);
        packet.push(self.event_code);
        packet.push(self.parameters.len() as u8);
        packet.extend_from_slice(&self.parameters);
        packet
    }

    /// Decode the parameters into a typed event
    pub fn decode(&self) -> Result<Event, HciError> {
        let p = &self.parameters[..];
        match self.event_code {
            EVT_DISCONN_COMPLETE => {
                ensure_len("Disconnection Complete", p, 4)?;
                Ok(Event::DisconnectionComplete {
                    status: p[0],
                    handle: ConnectionHandle(u16::from_le_bytes([p[1], p[2]]) & ACL_HANDLE_MASK),
                    reason: p[3],
                })
            }
            EVT_ENCRYPTION_CHANGE => {
                ensure_len("Encryption Change", p, 4)?;
                Ok(Event::EncryptionChange {
                    status: p[0],
                    handle: ConnectionHandle(u16::from_le_bytes([p[1], p[2]]) & ACL_HANDLE_MASK),
                    enabled: p[3] != 0,
                })
            }
            EVT_CMD_COMPLETE => {
                ensure_len("Command Complete", p, 3)?;
                Ok(Event::CommandComplete(CommandComplete {
                    num_packets: p[0],
                    opcode: u16::from_le_bytes([p[1], p[2]]),
                    return_parameters: p[3..].to_vec(),
                }))
            }
            EVT_CMD_STATUS => {
                ensure_len("Command Status", p, 4)?;
                Ok(Event::CommandStatus {
                    status: p[0],
                    num_packets: p[1],
                    opcode: u16::from_le_bytes([p[2], p[3]]),
                })
            }
            EVT_NUM_COMP_PKTS => {
                ensure_len("Number Of Completed Packets", p, 1)?;
                let num_handles = p[0] as usize;
                ensure_len("Number Of Completed Packets", p, 1 + num_handles * 4)?;

                let mut cursor = Cursor::new(&p[1..]);
                let mut completed = Vec::with_capacity(num_handles);
                for _ in 0..num_handles {
                    let handle = cursor.read_u16::<LittleEndian>()? & ACL_HANDLE_MASK;
                    let count = cursor.read_u16::<LittleEndian>()?;
                    completed.push((ConnectionHandle(handle), count));
                }
                Ok(Event::NumberOfCompletedPackets(completed))
            }
            EVT_LE_META_EVENT => {
                ensure_len("LE Meta", p, 1)?;
                match p[0] {
                    EVT_LE_CONN_COMPLETE => Ok(Event::LeConnectionComplete(
                        LeConnectionComplete::parse(&p[1..])?,
                    )),
                    EVT_LE_CONN_UPDATE_COMPLETE => {
                        ensure_len("LE Connection Update Complete", &p[1..], 9)?;
                        let mut cursor = Cursor::new(&p[2..]);
                        let handle = cursor.read_u16::<LittleEndian>()? & ACL_HANDLE_MASK;
                        Ok(Event::LeConnectionUpdateComplete {
                            status: p[1],
                            handle: ConnectionHandle(handle),
                            interval: cursor.read_u16::<LittleEndian>()?,
                            latency: cursor.read_u16::<LittleEndian>()?,
                            supervision_timeout: cursor.read_u16::<LittleEndian>()?,
                        })
                    }
                    _ => Ok(Event::Unknown(self.clone())),
                }
            }
            _ => Ok(Event::Unknown(self.clone())),
        }
    }
}

/// Events the host reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DisconnectionComplete {
        status: u8,
        handle: ConnectionHandle,
        reason: u8,
    },
    EncryptionChange {
        status: u8,
        handle: ConnectionHandle,
        enabled: bool,
    },
    CommandComplete(CommandComplete),
    CommandStatus {
        status: u8,
        num_packets: u8,
        opcode: u16,
    },
    NumberOfCompletedPackets(Vec<(ConnectionHandle, u16)>),
    LeConnectionComplete(LeConnectionComplete),
    LeConnectionUpdateComplete {
        status: u8,
        handle: ConnectionHandle,
        interval: u16,
        latency: u16,
        supervision_timeout: u16,
    },
    Unknown(HciEvent),
}

/// Command Complete event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub num_packets: u8,
    pub opcode: u16,
    pub return_parameters: Vec<u8>,
}

impl CommandComplete {
    /// First return parameter, present on every command the host issues
    pub fn status(&self) -> Option<u8> {
        self.return_parameters.first().copied()
    }
}

/// Controller ACL buffer limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSize {
    /// Maximum ACL payload length per packet
    pub packet_length: u16,
    /// Number of ACL packets the controller can hold
    pub max_packets: u16,
}

impl BufferSize {
    /// Return parameters of LE Read Buffer Size
    pub fn from_le_read_buffer_size(params: &[u8]) -> Result<Self, HciError> {
        ensure_len("LE Read Buffer Size", params, 4)?;
        Ok(Self {
            packet_length: u16::from_le_bytes([params[1], params[2]]),
            max_packets: params[3] as u16,
        })
    }

    /// Return parameters of (BR/EDR) Read Buffer Size
    pub fn from_read_buffer_size(params: &[u8]) -> Result<Self, HciError> {
        ensure_len("Read Buffer Size", params, 8)?;
        Ok(Self {
            packet_length: u16::from_le_bytes([params[1], params[2]]),
            max_packets: u16::from_le_bytes([params[4], params[5]]),
        })
    }

    /// A zero in either field means the controller shares the BR/EDR buffers.
    pub fn is_unset(&self) -> bool {
        self.packet_length == 0 || self.max_packets == 0
    }
}

/// Return parameters of Read Local Version Information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVersion {
    pub hci_version: u8,
    pub hci_revision: u16,
    pub lmp_version: u8,
    pub manufacturer: u16,
    pub lmp_subversion: u16,
}

impl LocalVersion {
    pub fn parse(params: &[u8]) -> Result<Self, HciError> {
        ensure_len("Read Local Version", params, 9)?;
        let mut cursor = Cursor::new(&params[1..]);
        Ok(Self {
            hci_version: cursor.read_u8()?,
            hci_revision: cursor.read_u16::<LittleEndian>()?,
            lmp_version: cursor.read_u8()?,
            manufacturer: cursor.read_u16::<LittleEndian>()?,
            lmp_subversion: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// Parse the return parameters of Read BD_ADDR
pub fn parse_bd_addr(params: &[u8]) -> Result<BdAddr, HciError> {
    ensure_len("Read BD_ADDR", params, 7)?;
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&params[1..7]);
    Ok(BdAddr(addr))
}

/// LE Connection Complete sub-event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeConnectionComplete {
    pub status: u8,
    pub handle: ConnectionHandle,
    pub role: u8,
    pub peer_address_type: AddressType,
    pub peer_address: BdAddr,
    pub interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
    pub master_clock_accuracy: u8,
}

impl LeConnectionComplete {
    /// Parse the sub-event parameters (sub-event code stripped)
    pub fn parse(p: &[u8]) -> Result<Self, HciError> {
        ensure_len("LE Connection Complete", p, 18)?;

        let mut peer_address = [0u8; 6];
        peer_address.copy_from_slice(&p[5..11]);

        Ok(Self {
            status: p[0],
            handle: ConnectionHandle(u16::from_le_bytes([p[1], p[2]]) & ACL_HANDLE_MASK),
            role: p[3],
            peer_address_type: AddressType::from_u8(p[4]),
            peer_address: BdAddr(peer_address),
            interval: u16::from_le_bytes([p[11], p[12]]),
            latency: u16::from_le_bytes([p[13], p[14]]),
            supervision_timeout: u16::from_le_bytes([p[15], p[16]]),
            master_clock_accuracy: p[17],
        })
    }
}

/// A packet received from the controller transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciPacket {
    Command { opcode: u16, parameters: Vec<u8> },
    Acl { header: AclHeader, data: Vec<u8> },
    Event(HciEvent),
}

impl HciPacket {
    /// Split a transport frame on its packet-type octet
    pub fn parse(data: &[u8]) -> Result<Self, HciError> {
        ensure_len("HCI packet", data, 1)?;
        let body = &data[1..];

        match data[0] {
            HCI_COMMAND_PKT => {
                ensure_len("command header", body, HCI_COMMAND_HEADER_SIZE)?;
                let len = body[2] as usize;
                ensure_len("command", body, HCI_COMMAND_HEADER_SIZE + len)?;
                Ok(HciPacket::Command {
                    opcode: u16::from_le_bytes([body[0], body[1]]),
                    parameters: body[3..3 + len].to_vec(),
                })
            }
            HCI_ACL_PKT => {
                let header = AclHeader::parse(body)?;
                let len = header.length as usize;
                ensure_len("ACL packet", body, HCI_ACL_HEADER_SIZE + len)?;
                Ok(HciPacket::Acl {
                    header,
                    data: body[HCI_ACL_HEADER_SIZE..HCI_ACL_HEADER_SIZE + len].to_vec(),
                })
            }
            HCI_EVENT_PKT => Ok(HciPacket::Event(HciEvent::parse(body)?)),
            other => Err(HciError::UnknownPacketType(other)),
        }
    }
}
