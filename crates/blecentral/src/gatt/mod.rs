//! GATT (Generic Attribute Profile) client
//!
//! Discovery, reads, writes and notification configuration on top of ATT,
//! one transaction at a time per link.

pub mod engine;
pub mod procedure;
pub mod types;


pub use engine::{AttTransactionEngine, GattEvent, SecurityLevel, TransactionState};
pub use procedure::{ConfigKind, Operation, Outcome};
pub use types::{
    AttributeCache, AttributeRecord, Characteristic, CharacteristicProperties,
    ClientConfiguration, Descriptor, IncludedService, Service,
};
