//! Host configuration
//!
//! Plain structs with defaults suitable for a central that pairs with Just
//! Works and talks GATT to a single kind of peripheral.

use crate::att::constants::{ATT_DEFAULT_MTU, ATT_MAX_MTU};
use crate::hci::{AddressType, BdAddr, ConnectionParameters};
use crate::smp::constants::SMP_MAX_ENCRYPTION_KEY_SIZE;
use crate::smp::{AuthRequirements, IoCapability, KeyDistribution};
use std::time::Duration;

/// ATT client settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttConfig {
    /// How long to wait for a response before sending the request again
    pub timeout: Duration,
    /// MTU offered in Exchange MTU; the result is never above this
    pub max_mtu: u16,
}

impl Default for AttConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(200),
            max_mtu: ATT_MAX_MTU,
        }
    }
}

impl AttConfig {
    /// Clamp a server's MTU to what this client accepts
    pub fn negotiate_mtu(&self, server_mtu: u16) -> u16 {
        server_mtu.min(self.max_mtu).max(ATT_DEFAULT_MTU)
    }
}

/// Pairing Request contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmpConfig {
    pub io_capability: IoCapability,
    pub oob_data_present: bool,
    pub auth_req: AuthRequirements,
    pub max_key_size: u8,
    pub initiator_key_dist: KeyDistribution,
    pub responder_key_dist: KeyDistribution,
}

impl Default for SmpConfig {
    fn default() -> Self {
        Self {
            io_capability: IoCapability::NoInputNoOutput,
            oob_data_present: false,
            auth_req: AuthRequirements::BONDING,
            max_key_size: SMP_MAX_ENCRYPTION_KEY_SIZE,
            initiator_key_dist: KeyDistribution::empty(),
            responder_key_dist: KeyDistribution::ENC_KEY,
        }
    }
}

/// Settings for [`crate::host::Host`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub att: AttConfig,
    pub smp: SmpConfig,
    /// Send Exchange MTU as soon as a link comes up
    pub auto_exchange_mtu: bool,
    /// Apply connection parameters a peripheral asks for over L2CAP
    /// signaling. When off they are only reported.
    pub apply_parameter_requests: bool,
    /// Own address used in pairing; read from the controller when `None`
    pub local_address: Option<(AddressType, BdAddr)>,
    /// LE Create Connection scan interval, 0.625 ms units
    pub scan_interval: u16,
    /// LE Create Connection scan window, 0.625 ms units
    pub scan_window: u16,
    /// Parameters requested when connecting
    pub connection_parameters: ConnectionParameters,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            att: AttConfig::default(),
            smp: SmpConfig::default(),
            auto_exchange_mtu: false,
            apply_parameter_requests: true,
            local_address: None,
            scan_interval: 0x0060,
            scan_window: 0x0030,
            connection_parameters: ConnectionParameters::default(),
        }
    }
}
