//! blecentral - host-side Bluetooth Low Energy central
//!
//! This library drives a Bluetooth controller over HCI to establish LE links
//! and talk GATT to peripherals. It covers ACL fragmentation, reassembly and
//! flow control, L2CAP fixed-channel routing, the GATT client transaction
//! engine, and Just Works pairing over SMP.
//!
//! Nothing here opens a device or spawns threads. The owner of a [`Host`]
//! writes through an [`HciTransport`] it provides and feeds whatever the
//! controller sends back into [`Host::handle_packet`].

pub mod att;
pub mod config;
pub mod error;
pub mod gatt;
pub mod hci;
pub mod host;
pub mod l2cap;
pub mod smp;
pub mod uuid;

// Re-export common types for convenience
pub use att::{AttError, AttErrorCode};
pub use config::{AttConfig, HostConfig, SmpConfig};
pub use error::{Error, HciError, ProtocolError, Result};
pub use gatt::{
    AttributeCache, AttributeRecord, Characteristic, CharacteristicProperties,
    ClientConfiguration, Descriptor, IncludedService, Operation, Outcome, SecurityLevel, Service,
};
pub use hci::{AddressType, BdAddr, ConnectionHandle, ConnectionParameters, HciTransport};
pub use host::{Host, HostEvent, Role};
pub use l2cap::L2capError;
pub use smp::{AuthRequirements, IoCapability, KeyDistribution, SmpError};
pub use uuid::Uuid;
