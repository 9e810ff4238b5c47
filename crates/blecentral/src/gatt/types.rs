//! Common types for GATT operations
//!
//! Discovery results are stored as tagged [`AttributeRecord`]s in a
//! per-connection [`AttributeCache`].

use crate::uuid::Uuid;

bitflags::bitflags! {
    /// Characteristic properties as defined in the Bluetooth specification
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

bitflags::bitflags! {
    /// Client Characteristic Configuration descriptor bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClientConfiguration: u16 {
        const NOTIFY = 0x0001;
        const INDICATE = 0x0002;
    }
}

/// A primary service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    /// Start handle for this service
    pub start_handle: u16,
    /// End handle for this service
    pub end_handle: u16,
}

/// An include declaration inside a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedService {
    /// Handle of the include declaration itself
    pub declaration_handle: u16,
    pub start_handle: u16,
    pub end_handle: u16,
    /// Only present when the included service has a 16-bit UUID
    pub uuid: Option<Uuid>,
}

/// A GATT characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    /// Declaration handle
    pub declaration_handle: u16,
    /// Value handle
    pub value_handle: u16,
    /// Last handle belonging to this characteristic, descriptors included
    pub end_handle: u16,
    pub properties: CharacteristicProperties,
}

/// A characteristic descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub handle: u16,
    pub uuid: Uuid,
}

/// One discovered attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeRecord {
    Service(Service),
    IncludedService(IncludedService),
    Characteristic(Characteristic),
    Descriptor(Descriptor),
}

impl AttributeRecord {
    /// The handle a record is known by: a service's start, an include's
    /// declaration, a characteristic's value, a descriptor's own handle.
    pub fn handle(&self) -> u16 {
        match self {
            AttributeRecord::Service(s) => s.start_handle,
            AttributeRecord::IncludedService(i) => i.declaration_handle,
            AttributeRecord::Characteristic(c) => c.value_handle,
            AttributeRecord::Descriptor(d) => d.handle,
        }
    }

    fn same_slot(&self, other: &AttributeRecord) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.handle() == other.handle()
    }
}

/// Append-only store of discovered attributes for one connection
#[derive(Debug, Clone, Default)]
pub struct AttributeCache {
    records: Vec<AttributeRecord>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record unless one of the same kind already has its handle.
    /// Returns whether the record was added.
    pub fn insert(&mut self, record: AttributeRecord) -> bool {
        if self.records.iter().any(|r| r.same_slot(&record)) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeRecord> {
        self.records.iter()
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.records.iter().filter_map(|r| match r {
            AttributeRecord::Service(s) => Some(s),
            _ => None,
        })
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.records.iter().filter_map(|r| match r {
            AttributeRecord::Characteristic(c) => Some(c),
            _ => None,
        })
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.records.iter().filter_map(|r| match r {
            AttributeRecord::Descriptor(d) => Some(d),
            _ => None,
        })
    }

    /// Look up a characteristic by its value handle
    pub fn characteristic(&self, value_handle: u16) -> Option<&Characteristic> {
        self.characteristics().find(|c| c.value_handle == value_handle)
    }
}
