//! SMP PDUs for LE legacy pairing
//!
//! Every PDU is a command code followed by a fixed-size payload. Parsing
//! ignores trailing bytes and rejects short input.

use super::constants::*;
use super::types::*;

fn ensure_len(data: &[u8], needed: usize, what: &'static str) -> SmpResult<()> {
    if data.len() < needed {
        return Err(SmpError::InvalidParameter(what));
    }
    Ok(())
}

fn array16(data: &[u8]) -> [u8; 16] {
    let mut value = [0u8; 16];
    value.copy_from_slice(&data[..16]);
    value
}

/// Pairing request/response packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingRequest {
    pub io_capability: u8,
    pub oob_data_present: u8,
    pub auth_req: AuthRequirements,
    pub max_key_size: u8,
    pub initiator_key_dist: KeyDistribution,
    pub responder_key_dist: KeyDistribution,
}

impl PairingRequest {
    /// Parse from raw packet, either code
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        ensure_len(data, 7, "Pairing request too short")?;

        Ok(Self {
            io_capability: data[1],
            oob_data_present: data[2],
            auth_req: AuthRequirements::from_bits_retain(data[3]),
            max_key_size: data[4],
            initiator_key_dist: KeyDistribution::from_bits_retain(data[5]),
            responder_key_dist: KeyDistribution::from_bits_retain(data[6]),
        })
    }

    /// Serialize to raw packet as a request or a response
    pub fn serialize(&self, is_request: bool) -> [u8; 7] {
        [
            if is_request {
                SMP_PAIRING_REQUEST
            } else {
                SMP_PAIRING_RESPONSE
            },
            self.io_capability,
            self.oob_data_present,
            self.auth_req.bits(),
            self.max_key_size,
            self.initiator_key_dist.bits(),
            self.responder_key_dist.bits(),
        ]
    }
}

/// Pairing confirm packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingConfirm {
    pub confirm_value: [u8; 16],
}

impl PairingConfirm {
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        ensure_len(data, 17, "Pairing confirm too short")?;
        Ok(Self {
            confirm_value: array16(&data[1..]),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(17);
        packet.push(SMP_PAIRING_CONFIRM);
        packet.extend_from_slice(&self.confirm_value);
        packet
    }
}

/// Pairing random packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingRandom {
    pub random_value: [u8; 16],
}

impl PairingRandom {
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        ensure_len(data, 17, "Pairing random too short")?;
        Ok(Self {
            random_value: array16(&data[1..]),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(17);
        packet.push(SMP_PAIRING_RANDOM);
        packet.extend_from_slice(&self.random_value);
        packet
    }
}

/// Pairing failed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFailed {
    pub reason: FailureReason,
}

impl PairingFailed {
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        ensure_len(data, 2, "Pairing failed too short")?;
        Ok(Self {
            reason: data[1].into(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        vec![SMP_PAIRING_FAILED, self.reason.into()]
    }
}

/// Encryption information packet (LTK)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInformation {
    pub long_term_key: [u8; 16],
}

impl EncryptionInformation {
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        ensure_len(data, 17, "Encryption information too short")?;
        Ok(Self {
            long_term_key: array16(&data[1..]),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(17);
        packet.push(SMP_ENCRYPTION_INFORMATION);
        packet.extend_from_slice(&self.long_term_key);
        packet
    }
}

/// Master identification packet (EDIV and Rand)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterIdentification {
    pub ediv: u16,
    pub rand: [u8; 8],
}

impl MasterIdentification {
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        ensure_len(data, 11, "Master identification too short")?;
        let mut rand = [0u8; 8];
        rand.copy_from_slice(&data[3..11]);
        Ok(Self {
            ediv: u16::from_le_bytes([data[1], data[2]]),
            rand,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(11);
        packet.push(SMP_MASTER_IDENTIFICATION);
        packet.extend_from_slice(&self.ediv.to_le_bytes());
        packet.extend_from_slice(&self.rand);
        packet
    }
}

/// Security request packet, sent by a responder that wants the link secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityRequest {
    pub auth_req: AuthRequirements,
}

impl SecurityRequest {
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        ensure_len(data, 2, "Security request too short")?;
        Ok(Self {
            auth_req: AuthRequirements::from_bits_retain(data[1]),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        vec![SMP_SECURITY_REQUEST, self.auth_req.bits()]
    }
}

/// Any SMP PDU a central can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpPdu {
    PairingRequest(PairingRequest),
    PairingResponse(PairingRequest),
    PairingConfirm(PairingConfirm),
    PairingRandom(PairingRandom),
    PairingFailed(PairingFailed),
    EncryptionInformation(EncryptionInformation),
    MasterIdentification(MasterIdentification),
    SecurityRequest(SecurityRequest),
    /// Recognised code this host has no use for
    Other(u8),
}

impl SmpPdu {
    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        let code = *data.first().ok_or(SmpError::InvalidParameter("Empty SMP PDU"))?;

        Ok(match code {
            SMP_PAIRING_REQUEST => SmpPdu::PairingRequest(PairingRequest::parse(data)?),
            SMP_PAIRING_RESPONSE => SmpPdu::PairingResponse(PairingRequest::parse(data)?),
            SMP_PAIRING_CONFIRM => SmpPdu::PairingConfirm(PairingConfirm::parse(data)?),
            SMP_PAIRING_RANDOM => SmpPdu::PairingRandom(PairingRandom::parse(data)?),
            SMP_PAIRING_FAILED => SmpPdu::PairingFailed(PairingFailed::parse(data)?),
            SMP_ENCRYPTION_INFORMATION => {
                SmpPdu::EncryptionInformation(EncryptionInformation::parse(data)?)
            }
            SMP_MASTER_IDENTIFICATION => {
                SmpPdu::MasterIdentification(MasterIdentification::parse(data)?)
            }
            SMP_SECURITY_REQUEST => SmpPdu::SecurityRequest(SecurityRequest::parse(data)?),
            other => SmpPdu::Other(other),
        })
    }
}
