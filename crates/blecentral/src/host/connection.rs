//! Per-link state and the registry of live links

use crate::config::HostConfig;
use crate::gatt::SecurityLevel;
use crate::hci::{AddressType, BdAddr, ConnectionHandle, LeConnectionComplete};
use crate::l2cap::ChannelRouter;
use crate::smp::PairingAddresses;
use std::collections::HashMap;

/// Our role on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
}

impl Role {
    pub fn from_u8(value: u8) -> Self {
        if value == 0x00 {
            Role::Central
        } else {
            Role::Peripheral
        }
    }
}

/// Everything the host knows about one LE link
#[derive(Debug)]
pub struct ConnectionContext {
    handle: ConnectionHandle,
    peer_address: BdAddr,
    peer_address_type: AddressType,
    role: Role,
    local_address: BdAddr,
    local_address_type: AddressType,
    router: ChannelRouter,
}

impl ConnectionContext {
    pub fn new(
        complete: &LeConnectionComplete,
        local: (AddressType, BdAddr),
        config: &HostConfig,
    ) -> Self {
        let (local_address_type, local_address) = local;
        let role = Role::from_u8(complete.role);

        let ours = (local_address_type.to_u8(), local_address.0);
        let theirs = (complete.peer_address_type.to_u8(), complete.peer_address.0);
        let (initiator, responder) = match role {
            Role::Central => (ours, theirs),
            Role::Peripheral => (theirs, ours),
        };
        let addresses = PairingAddresses {
            initiator_type: initiator.0,
            initiator: initiator.1,
            responder_type: responder.0,
            responder: responder.1,
        };

        Self {
            handle: complete.handle,
            peer_address: complete.peer_address,
            peer_address_type: complete.peer_address_type,
            role,
            local_address,
            local_address_type,
            router: ChannelRouter::new(config.att, config.smp, addresses),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn peer_address(&self) -> BdAddr {
        self.peer_address
    }

    pub fn peer_address_type(&self) -> AddressType {
        self.peer_address_type
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_address(&self) -> (AddressType, BdAddr) {
        (self.local_address_type, self.local_address)
    }

    pub fn mtu(&self) -> u16 {
        self.router.att().mtu()
    }

    pub fn security(&self) -> SecurityLevel {
        self.router.att().security()
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut ChannelRouter {
        &mut self.router
    }
}

/// Live links by handle
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    links: HashMap<ConnectionHandle, ConnectionContext>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new link. A stale context with the same handle is returned.
    pub fn insert(&mut self, context: ConnectionContext) -> Option<ConnectionContext> {
        self.links.insert(context.handle, context)
    }

    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<ConnectionContext> {
        self.links.remove(&handle)
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<&ConnectionContext> {
        self.links.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ConnectionHandle) -> Option<&mut ConnectionContext> {
        self.links.get_mut(&handle)
    }

    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.links.contains_key(&handle)
    }

    /// Handles of every live link, in ascending order
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        let mut handles: Vec<_> = self.links.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionContext> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
