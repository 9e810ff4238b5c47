//! Bluetooth attribute UUIDs
//!
//! A UUID is kept in the form it was received on the wire. 16-bit UUIDs are
//! carried as a little-endian `u16`. 128-bit UUIDs are carried byte-reversed
//! relative to their canonical string form, so the stored bytes are the wire
//! bytes and `Display` reverses them.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`, wire order.
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where a 16-bit value is inserted.
const BASE_OFFSET: usize = 12;

/// UUID of a GATT attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uuid {
    /// SIG-assigned 16-bit UUID
    Uuid16(u16),
    /// Full 128-bit UUID, wire (little-endian) byte order
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Decode a UUID from its wire bytes. Accepts 2 or 16 bytes.
    pub fn from_le_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Uuid::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Some(Uuid::Uuid128(uuid))
            }
            _ => None,
        }
    }

    /// Wire encoding of this UUID
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Uuid::Uuid16(uuid) => uuid.to_le_bytes().to_vec(),
            Uuid::Uuid128(bytes) => bytes.to_vec(),
        }
    }

    /// The 16-bit value, if this is a SIG-assigned UUID
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Uuid::Uuid16(uuid) => Some(*uuid),
            Uuid::Uuid128(bytes) => {
                let sig = bytes[..BASE_OFFSET] == BASE_UUID_BYTES[..BASE_OFFSET]
                    && bytes[BASE_OFFSET + 2] == 0
                    && bytes[BASE_OFFSET + 3] == 0;
                sig.then(|| u16::from_le_bytes([bytes[BASE_OFFSET], bytes[BASE_OFFSET + 1]]))
            }
        }
    }

    /// Expand to the full 128-bit form (wire order)
    pub fn to_uuid128(&self) -> [u8; 16] {
        match self {
            Uuid::Uuid16(uuid) => {
                let mut bytes = BASE_UUID_BYTES;
                bytes[BASE_OFFSET..BASE_OFFSET + 2].copy_from_slice(&uuid.to_le_bytes());
                bytes
            }
            Uuid::Uuid128(bytes) => *bytes,
        }
    }

    /// Compare two UUIDs regardless of the form they were received in
    pub fn matches(&self, other: &Uuid) -> bool {
        self.to_uuid128() == other.to_uuid128()
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::Uuid16(uuid16)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(uuid) => write!(f, "{:04x}", uuid),
            Uuid::Uuid128(bytes) => {
                let mut b = *bytes;
                b.reverse();
                write!(
                    f,
                    "{}-{}-{}-{}-{}",
                    hex::encode(&b[0..4]),
                    hex::encode(&b[4..6]),
                    hex::encode(&b[6..8]),
                    hex::encode(&b[8..10]),
                    hex::encode(&b[10..16])
                )
            }
        }
    }
}

/// Error returned when parsing a UUID string
#[derive(Debug, Error, PartialEq)]
pub enum UuidParseError {
    #[error("UUID must have 4 or 32 hex digits, got {0}")]
    InvalidLength(usize),

    #[error("Invalid hex in UUID: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Parses `"2a00"`, `"0x2A00"`, or the canonical 128-bit form with or without dashes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();

        match cleaned.len() {
            4 => {
                let mut raw = [0u8; 2];
                hex::decode_to_slice(&cleaned, &mut raw)?;
                Ok(Uuid::Uuid16(u16::from_be_bytes(raw)))
            }
            32 => {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                bytes.reverse();
                Ok(Uuid::Uuid128(bytes))
            }
            n => Err(UuidParseError::InvalidLength(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid128_wire_order_is_reversed() {
        let uuid: Uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap();
        let wire = uuid.to_le_bytes();
        assert_eq!(wire[0], 0x9e);
        assert_eq!(wire[15], 0x6e);
        assert_eq!(uuid.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(Uuid::from_le_slice(&wire), Some(uuid));
    }

    #[test]
    fn test_uuid16_not_reversed() {
        let uuid: Uuid = "2A00".parse().unwrap();
        assert_eq!(uuid, Uuid::Uuid16(0x2a00));
        assert_eq!(uuid.to_le_bytes(), vec![0x00, 0x2a]);
        assert_eq!(uuid.to_string(), "2a00");
    }

    #[test]
    fn test_short_and_long_forms_match() {
        let long: Uuid = "00002902-0000-1000-8000-00805f9b34fb".parse().unwrap();
        assert!(long.matches(&Uuid::Uuid16(0x2902)));
        assert_eq!(long.as_u16(), Some(0x2902));
        assert!(!long.matches(&Uuid::Uuid16(0x2903)));
    }

    #[test]
    fn test_invalid_uuid_strings() {
        assert_eq!("123".parse::<Uuid>(), Err(UuidParseError::InvalidLength(3)));
        assert!(matches!("zzzz".parse::<Uuid>(), Err(UuidParseError::Hex(_))));
    }
}
