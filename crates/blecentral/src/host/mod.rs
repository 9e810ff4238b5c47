//! Host driver
//!
//! [`Host`] ties the controller transport, ACL flow control and the per-link
//! channel routers together. It never blocks and never reads on its own: state
//! only moves when the owner feeds it a packet from the controller, calls
//! [`Host::handle_timeout`], or issues an operation.
//!
//! Operations take a completion callback which is called exactly once: with
//! the outcome, with the peer's error, or with [`Error::Disconnected`] when
//! the link goes away first. Everything else the host has to report is queued
//! as a [`HostEvent`] for [`Host::poll_event`].

mod completion;
mod connection;


pub use completion::{Completion, CompletionKey, CompletionTable};
pub use connection::{ConnectionContext, ConnectionRegistry, Role};

use crate::config::HostConfig;
use crate::error::{Error, HciError, Result};
use crate::gatt::{ClientConfiguration, GattEvent, Operation, Outcome, SecurityLevel, Service};
use crate::hci::constants::*;
use crate::hci::packet::{opcode, parse_bd_addr};
use crate::hci::{
    AclHeader, AddressType, BdAddr, BufferSize, CommandComplete, ConnectionHandle,
    ConnectionParameters, Event, FlowController, HciCommand, HciPacket, HciTransport,
    LeConnectionComplete, LocalVersion,
};
use crate::l2cap::{ChannelRouter, LinkEvent, LinkOutput};
use crate::smp::{SmpError, SmpEvent};
use crate::uuid::Uuid;
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::time::Instant;

const DISCONNECT: u16 = opcode(OGF_LINK_CTL, OCF_DISCONNECT);
const READ_LOCAL_VERSION: u16 = opcode(OGF_INFO_PARAM, OCF_READ_LOCAL_VERSION);
const READ_BUFFER_SIZE: u16 = opcode(OGF_INFO_PARAM, OCF_READ_BUFFER_SIZE);
const READ_BD_ADDR: u16 = opcode(OGF_INFO_PARAM, OCF_READ_BD_ADDR);
const LE_READ_BUFFER_SIZE: u16 = opcode(OGF_LE, OCF_LE_READ_BUFFER_SIZE);
const LE_CONNECTION_UPDATE: u16 = opcode(OGF_LE, OCF_LE_CONNECTION_UPDATE);

/// Unsolicited reports from the host
#[derive(Debug)]
pub enum HostEvent {
    /// Startup sequence finished and ACL buffer sizes are known
    Ready {
        local_address: Option<(AddressType, BdAddr)>,
        version: Option<LocalVersion>,
    },
    Connected {
        handle: ConnectionHandle,
        peer_address: BdAddr,
        peer_address_type: AddressType,
        role: Role,
    },
    ConnectionFailed {
        status: u8,
    },
    Disconnected {
        handle: ConnectionHandle,
        reason: u8,
    },
    ConnectionUpdated {
        handle: ConnectionHandle,
        interval: u16,
        latency: u16,
        supervision_timeout: u16,
    },
    /// The peer asked for new parameters and was told they are acceptable.
    /// Unless [`HostConfig::apply_parameter_requests`] is off, an LE
    /// Connection Update carrying them has already been queued.
    ConnectionParameterUpdateRequest {
        handle: ConnectionHandle,
        parameters: ConnectionParameters,
    },
    MtuExchanged {
        handle: ConnectionHandle,
        mtu: u16,
    },
    Notification {
        handle: ConnectionHandle,
        attribute: u16,
        value: Vec<u8>,
        indication: bool,
    },
    EncryptionChanged {
        handle: ConnectionHandle,
        enabled: bool,
    },
    SecurityFailed {
        handle: ConnectionHandle,
        error: SmpError,
    },
    LongTermKey {
        handle: ConnectionHandle,
        key: [u8; 16],
    },
    MasterIdentification {
        handle: ConnectionHandle,
        ediv: u16,
        rand: [u8; 8],
    },
    CommandFailed {
        opcode: u16,
        status: u8,
    },
}

/// BLE central host over one controller
pub struct Host<T: HciTransport> {
    transport: T,
    config: HostConfig,
    flow: FlowController,
    connections: ConnectionRegistry,
    completions: CompletionTable,
    events: VecDeque<HostEvent>,
    commands: VecDeque<HciCommand>,
    command_credits: u8,
    local: Option<(AddressType, BdAddr)>,
    version: Option<LocalVersion>,
    ready: bool,
    stopped: bool,
}

impl<T: HciTransport> Host<T> {
    pub fn new(transport: T, config: HostConfig) -> Self {
        Self {
            transport,
            local: config.local_address,
            config,
            flow: FlowController::new(),
            connections: ConnectionRegistry::new(),
            completions: CompletionTable::new(),
            events: VecDeque::new(),
            commands: VecDeque::new(),
            command_credits: 1,
            version: None,
            ready: false,
            stopped: false,
        }
    }

    /// Queue the controller startup sequence. [`HostEvent::Ready`] follows
    /// once the controller has answered all of it.
    pub fn init(&mut self) -> Result<()> {
        self.ensure_running()?;
        info!("Initializing controller");
        self.commands.extend([
            HciCommand::Reset,
            HciCommand::SetEventMask {
                event_mask: EVENT_MASK_DEFAULT,
            },
            HciCommand::LeSetEventMask {
                event_mask: LE_EVENT_MASK_DEFAULT,
            },
            HciCommand::ReadBdAddr,
            HciCommand::ReadLocalVersion,
            HciCommand::LeReadBufferSize,
        ]);
        self.pump_commands()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Set after a transport failure; every call then returns [`Error::Stopped`]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn local_address(&self) -> Option<(AddressType, BdAddr)> {
        self.local
    }

    pub fn local_version(&self) -> Option<LocalVersion> {
        self.version
    }

    pub fn connection(&self, handle: ConnectionHandle) -> Option<&ConnectionContext> {
        self.connections.get(handle)
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    /// Completions not yet resolved, over all links
    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn poll_event(&mut self) -> Option<HostEvent> {
        self.events.pop_front()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped {
            return Err(Error::Stopped);
        }
        Ok(())
    }

    /// Tear everything down after the transport failed
    fn stop(&mut self, cause: HciError) -> Error {
        error!("Transport failure, stopping host: {}", cause);
        self.stopped = true;
        self.commands.clear();
        for handle in self.connections.handles() {
            if let Some(mut context) = self.connections.remove(handle) {
                context.router_mut().close();
            }
            self.flow.remove_link(handle);
        }
        self.completions.resolve_all(|| Error::Stopped);
        Error::Transport(cause)
    }

    fn transmit(&mut self, packet: &[u8]) -> Result<()> {
        trace!("HCI tx {}", hex::encode(packet));
        if let Err(e) = self.transport.write_packet(packet) {
            return Err(self.stop(e));
        }
        Ok(())
    }

    /// Send queued commands while the controller accepts them
    fn pump_commands(&mut self) -> Result<()> {
        while self.command_credits > 0 {
            let Some(command) = self.commands.pop_front() else {
                break;
            };
            debug!("Sending {:?}", command);
            self.command_credits -= 1;
            self.transmit(&command.to_packet())?;
        }
        Ok(())
    }

    fn send_command(&mut self, command: HciCommand) -> Result<()> {
        self.ensure_running()?;
        self.commands.push_back(command);
        self.pump_commands()
    }

    /// Hand every ACL packet the controller has room for to the transport
    fn flush(&mut self) -> Result<()> {
        for packet in self.flow.drain() {
            self.transmit(&packet)?;
        }
        Ok(())
    }

    /// Feed one packet read from the controller, packet-type octet included.
    ///
    /// Malformed input is logged and dropped. The only errors returned are a
    /// transport failure while answering, or [`Error::Stopped`].
    pub fn handle_packet(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_running()?;
        trace!("HCI rx {}", hex::encode(data));

        let packet = match HciPacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping HCI packet: {}", e);
                return Ok(());
            }
        };
        match packet {
            HciPacket::Event(event) => match event.decode() {
                Ok(decoded) => self.handle_event(decoded),
                Err(e) => {
                    warn!("Dropping event 0x{:02x}: {}", event.event_code, e);
                    Ok(())
                }
            },
            HciPacket::Acl { header, data } => self.handle_acl(header, &data),
            HciPacket::Command { opcode, .. } => {
                debug!("Ignoring command packet 0x{:04x} from controller", opcode);
                Ok(())
            }
        }
    }

    fn handle_acl(&mut self, header: AclHeader, data: &[u8]) -> Result<()> {
        let Some(frame) = self.flow.reassemble(header, data) else {
            return Ok(());
        };
        let Some(context) = self.connections.get_mut(frame.handle) else {
            debug!("Dropping frame for unknown connection {}", frame.handle);
            return Ok(());
        };

        let mut out = LinkOutput::new(Instant::now());
        context
            .router_mut()
            .handle_frame(frame.channel_id, &frame.payload, &mut out);
        self.process_output(frame.handle, out)
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::CommandComplete(complete) => {
                self.command_credits = complete.num_packets;
                self.on_command_complete(complete)?;
                self.pump_commands()
            }
            Event::CommandStatus {
                status,
                num_packets,
                opcode,
            } => {
                self.command_credits = num_packets;
                if status != HCI_SUCCESS {
                    warn!("Command 0x{:04x} failed with status 0x{:02x}", opcode, status);
                    self.events
                        .push_back(HostEvent::CommandFailed { opcode, status });
                }
                self.pump_commands()
            }
            Event::NumberOfCompletedPackets(completed) => {
                for (handle, count) in completed {
                    self.flow.complete(handle, count);
                }
                self.flush()
            }
            Event::LeConnectionComplete(complete) => self.on_connection_complete(complete),
            Event::DisconnectionComplete {
                status,
                handle,
                reason,
            } => self.on_disconnection_complete(status, handle, reason),
            Event::EncryptionChange {
                status,
                handle,
                enabled,
            } => self.on_encryption_change(status, handle, enabled),
            Event::LeConnectionUpdateComplete {
                status,
                handle,
                interval,
                latency,
                supervision_timeout,
            } => {
                if status != HCI_SUCCESS {
                    warn!("Connection update on {} failed: 0x{:02x}", handle, status);
                    self.events.push_back(HostEvent::CommandFailed {
                        opcode: LE_CONNECTION_UPDATE,
                        status,
                    });
                } else {
                    self.events.push_back(HostEvent::ConnectionUpdated {
                        handle,
                        interval,
                        latency,
                        supervision_timeout,
                    });
                }
                Ok(())
            }
            Event::Unknown(event) => {
                trace!("Ignoring event 0x{:02x}", event.event_code);
                Ok(())
            }
        }
    }

    fn on_command_complete(&mut self, complete: CommandComplete) -> Result<()> {
        if let Some(status) = complete.status().filter(|s| *s != HCI_SUCCESS) {
            warn!(
                "Command 0x{:04x} failed with status 0x{:02x}",
                complete.opcode, status
            );
            self.events.push_back(HostEvent::CommandFailed {
                opcode: complete.opcode,
                status,
            });
            return Ok(());
        }

        let params = &complete.return_parameters;
        match complete.opcode {
            READ_BD_ADDR => match parse_bd_addr(params) {
                Ok(address) => {
                    debug!("Controller address {}", address);
                    if self.local.is_none() {
                        self.local = Some((AddressType::Public, address));
                    }
                }
                Err(e) => warn!("Bad Read BD_ADDR result: {}", e),
            },
            READ_LOCAL_VERSION => match LocalVersion::parse(params) {
                Ok(version) => {
                    debug!("{:?}", version);
                    self.version = Some(version);
                }
                Err(e) => warn!("Bad Read Local Version result: {}", e),
            },
            LE_READ_BUFFER_SIZE => match BufferSize::from_le_read_buffer_size(params) {
                Ok(buffers) if buffers.is_unset() => {
                    debug!("LE buffers shared with BR/EDR, reading those");
                    self.commands.push_back(HciCommand::ReadBufferSize);
                }
                Ok(buffers) => return self.set_buffers(buffers),
                Err(e) => warn!("Bad LE Read Buffer Size result: {}", e),
            },
            READ_BUFFER_SIZE => match BufferSize::from_read_buffer_size(params) {
                Ok(buffers) => return self.set_buffers(buffers),
                Err(e) => warn!("Bad Read Buffer Size result: {}", e),
            },
            other => trace!("Command 0x{:04x} complete", other),
        }
        Ok(())
    }

    fn set_buffers(&mut self, buffers: BufferSize) -> Result<()> {
        self.flow.set_buffers(buffers);
        if !self.ready {
            self.ready = true;
            info!("Controller ready");
            self.events.push_back(HostEvent::Ready {
                local_address: self.local,
                version: self.version,
            });
        }
        self.flush()
    }

    fn on_connection_complete(&mut self, complete: LeConnectionComplete) -> Result<()> {
        if complete.status != HCI_SUCCESS {
            warn!("Connection failed with status 0x{:02x}", complete.status);
            self.events.push_back(HostEvent::ConnectionFailed {
                status: complete.status,
            });
            return Ok(());
        }

        let handle = complete.handle;
        let local = self.local.unwrap_or_else(|| {
            warn!("Local address unknown, pairing will use an all-zero address");
            (AddressType::Public, BdAddr::default())
        });
        let context = ConnectionContext::new(&complete, local, &self.config);
        info!("Connected to {} on {}", complete.peer_address, handle);

        if let Some(mut stale) = self.connections.insert(context) {
            warn!("Replacing stale connection {}", handle);
            stale.router_mut().close();
            self.flow.remove_link(handle);
            self.completions
                .resolve_connection(handle, || Error::Disconnected(handle));
        }
        self.flow.add_link(handle);
        self.events.push_back(HostEvent::Connected {
            handle,
            peer_address: complete.peer_address,
            peer_address_type: complete.peer_address_type,
            role: Role::from_u8(complete.role),
        });

        if !self.config.auto_exchange_mtu {
            return Ok(());
        }
        let mut out = LinkOutput::new(Instant::now());
        if let Some(context) = self.connections.get_mut(handle) {
            context.router_mut().att_mut().exchange_mtu(&mut out);
        }
        self.process_output(handle, out)
    }

    fn on_disconnection_complete(
        &mut self,
        status: u8,
        handle: ConnectionHandle,
        reason: u8,
    ) -> Result<()> {
        if status != HCI_SUCCESS {
            warn!("Disconnect of {} failed with status 0x{:02x}", handle, status);
            self.events.push_back(HostEvent::CommandFailed {
                opcode: DISCONNECT,
                status,
            });
            return Ok(());
        }
        let Some(mut context) = self.connections.remove(handle) else {
            debug!("Disconnection of unknown connection {}", handle);
            return Ok(());
        };

        context.router_mut().close();
        self.flow.remove_link(handle);
        let failed = self
            .completions
            .resolve_connection(handle, || Error::Disconnected(handle));
        info!(
            "{} disconnected, reason 0x{:02x}, {} operations failed",
            handle, reason, failed
        );
        self.events
            .push_back(HostEvent::Disconnected { handle, reason });

        // Credit held by the link is gone; other links may send again
        self.flush()
    }

    fn on_encryption_change(
        &mut self,
        status: u8,
        handle: ConnectionHandle,
        enabled: bool,
    ) -> Result<()> {
        let Some(context) = self.connections.get_mut(handle) else {
            debug!("Encryption change on unknown connection {}", handle);
            return Ok(());
        };
        let encrypted = status == HCI_SUCCESS && enabled;
        debug!("Encryption on {} is now {}", handle, encrypted);

        let mut out = LinkOutput::new(Instant::now());
        context
            .router_mut()
            .on_encryption_change(encrypted, status, &mut out);

        let key = CompletionKey {
            connection: handle,
            operation: Operation::RequestEncryption,
            handle: 0,
        };
        if encrypted {
            self.completions.resolve_each(key, || Ok(Outcome::Encrypted));
        } else {
            self.completions.resolve_each(key, || {
                Err(Error::Security(SmpError::EncryptionFailed(status)))
            });
        }
        self.events.push_back(HostEvent::EncryptionChanged {
            handle,
            enabled: encrypted,
        });
        self.process_output(handle, out)
    }

    /// Move what a link's engines produced into the flow controller, the
    /// completion table and the event queue.
    fn process_output(&mut self, handle: ConnectionHandle, mut out: LinkOutput) -> Result<()> {
        for frame in out.frames.drain(..) {
            self.flow
                .enqueue(handle, frame.flags, frame.channel_id, &frame.payload);
        }
        for event in out.events.drain(..) {
            self.on_link_event(handle, event);
        }
        self.flush()?;
        self.pump_commands()
    }

    fn on_link_event(&mut self, handle: ConnectionHandle, event: LinkEvent) {
        match event {
            LinkEvent::Gatt(GattEvent::Completed {
                operation,
                handle: attribute,
                result,
            }) => {
                match &result {
                    Ok(Outcome::Mtu(mtu)) => {
                        self.events
                            .push_back(HostEvent::MtuExchanged { handle, mtu: *mtu });
                    }
                    Err(e) => debug!("{:?} on {} failed: {}", operation, handle, e),
                    Ok(_) => {}
                }
                let key = CompletionKey {
                    connection: handle,
                    operation,
                    handle: attribute,
                };
                self.completions.resolve(key, result);
            }
            LinkEvent::Gatt(GattEvent::Notification {
                handle: attribute,
                value,
                indication,
            }) => self.events.push_back(HostEvent::Notification {
                handle,
                attribute,
                value,
                indication,
            }),
            LinkEvent::Smp(SmpEvent::Stk(stk)) => {
                debug!("STK ready on {}, starting encryption", handle);
                self.commands.push_back(HciCommand::LeStartEncryption {
                    handle,
                    random: [0; 8],
                    ediv: 0,
                    ltk: stk,
                });
            }
            LinkEvent::Smp(SmpEvent::Ltk(key)) => {
                self.events.push_back(HostEvent::LongTermKey { handle, key })
            }
            LinkEvent::Smp(SmpEvent::MasterIdentification { ediv, rand }) => self
                .events
                .push_back(HostEvent::MasterIdentification { handle, ediv, rand }),
            LinkEvent::Smp(SmpEvent::Failed(error)) => {
                warn!("Pairing on {} failed: {}", handle, error);
                let key = CompletionKey {
                    connection: handle,
                    operation: Operation::RequestEncryption,
                    handle: 0,
                };
                self.completions
                    .resolve_each(key, || Err(Error::Security(error.clone())));
                self.events
                    .push_back(HostEvent::SecurityFailed { handle, error });
            }
            LinkEvent::ConnectionParameterUpdateRequest(parameters) => {
                if self.config.apply_parameter_requests {
                    debug!("Applying peer connection parameters on {}", handle);
                    self.commands
                        .push_back(HciCommand::LeConnectionUpdate { handle, parameters });
                }
                self.events
                    .push_back(HostEvent::ConnectionParameterUpdateRequest { handle, parameters });
            }
        }
    }

    /// Resend ATT requests that have waited too long. Requests are stamped
    /// with [`Instant::now`] when sent, so `now` must come from the same
    /// monotonic clock.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        self.ensure_running()?;
        for handle in self.connections.handles() {
            let Some(context) = self.connections.get_mut(handle) else {
                continue;
            };
            let mut out = LinkOutput::new(now);
            context.router_mut().handle_timeout(now, &mut out);
            self.process_output(handle, out)?;
        }
        Ok(())
    }

    /// When [`Host::handle_timeout`] next has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .iter()
            .filter_map(|context| context.router().next_deadline())
            .min()
    }

    /// Initiate a connection to a peripheral
    pub fn connect(&mut self, peer_address: BdAddr, peer_address_type: AddressType) -> Result<()> {
        let own_addr_type = self.local.map_or(AddressType::Public, |(kind, _)| kind);
        info!("Connecting to {}", peer_address);
        self.send_command(HciCommand::LeCreateConnection {
            scan_interval: self.config.scan_interval,
            scan_window: self.config.scan_window,
            peer_addr_type: peer_address_type,
            peer_addr: peer_address,
            own_addr_type,
            parameters: self.config.connection_parameters,
        })
    }

    pub fn cancel_connect(&mut self) -> Result<()> {
        self.send_command(HciCommand::LeCreateConnectionCancel)
    }

    /// Ask the controller to drop a link. Pending operations fail once the
    /// Disconnection Complete event arrives.
    pub fn disconnect(&mut self, handle: ConnectionHandle, reason: u8) -> Result<()> {
        self.ensure_running()?;
        if !self.connections.contains(handle) {
            return Err(Error::UnknownConnection(handle));
        }
        self.send_command(HciCommand::Disconnect { handle, reason })
    }

    pub fn update_connection_parameters(
        &mut self,
        handle: ConnectionHandle,
        parameters: ConnectionParameters,
    ) -> Result<()> {
        self.ensure_running()?;
        if !self.connections.contains(handle) {
            return Err(Error::UnknownConnection(handle));
        }
        self.send_command(HciCommand::LeConnectionUpdate { handle, parameters })
    }

    /// Register `completion` and start an ATT operation on one link.
    ///
    /// A stopped host or unknown link resolves the completion at once. The
    /// returned error only reports a transport failure.
    fn submit<F>(
        &mut self,
        connection: ConnectionHandle,
        operation: Operation,
        attribute: u16,
        completion: Completion,
        issue: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut ChannelRouter, &mut LinkOutput),
    {
        if self.stopped {
            completion(Err(Error::Stopped));
            return Ok(());
        }
        let Some(context) = self.connections.get_mut(connection) else {
            completion(Err(Error::UnknownConnection(connection)));
            return Ok(());
        };

        let key = CompletionKey {
            connection,
            operation,
            handle: attribute,
        };
        self.completions.register(key, completion);

        let mut out = LinkOutput::new(Instant::now());
        let router = context.router_mut();
        issue(router, &mut out);
        router.settle(&mut out);
        self.process_output(connection, out)
    }

    pub fn exchange_mtu<F>(&mut self, connection: ConnectionHandle, completion: F) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::ExchangeMtu,
            0,
            Box::new(completion),
            |router, out| router.att_mut().exchange_mtu(out),
        )
    }

    /// Discover primary services. An empty `filter` keeps them all.
    pub fn discover_services<F>(
        &mut self,
        connection: ConnectionHandle,
        filter: Vec<Uuid>,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::DiscoverServices,
            0,
            Box::new(completion),
            |router, out| router.att_mut().discover_services(filter, out),
        )
    }

    pub fn discover_included_services<F>(
        &mut self,
        connection: ConnectionHandle,
        service: &Service,
        filter: Vec<Uuid>,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::DiscoverIncludedServices,
            service.start_handle,
            Box::new(completion),
            |router, out| {
                router
                    .att_mut()
                    .discover_included_services(service, filter, out)
            },
        )
    }

    pub fn discover_characteristics<F>(
        &mut self,
        connection: ConnectionHandle,
        service: &Service,
        filter: Vec<Uuid>,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::DiscoverCharacteristics,
            service.start_handle,
            Box::new(completion),
            |router, out| {
                router
                    .att_mut()
                    .discover_characteristics(service, filter, out)
            },
        )
    }

    /// Discover descriptors of a characteristic already discovered on this
    /// link, by its value handle.
    pub fn discover_descriptors<F>(
        &mut self,
        connection: ConnectionHandle,
        value_handle: u16,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::DiscoverDescriptors,
            value_handle,
            Box::new(completion),
            |router, out| router.att_mut().discover_descriptors(value_handle, out),
        )
    }

    pub fn read<F>(&mut self, connection: ConnectionHandle, handle: u16, completion: F) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::Read,
            handle,
            Box::new(completion),
            |router, out| router.att_mut().read(handle, out),
        )
    }

    pub fn read_descriptor<F>(
        &mut self,
        connection: ConnectionHandle,
        handle: u16,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::ReadDescriptor,
            handle,
            Box::new(completion),
            |router, out| router.att_mut().read_descriptor(handle, out),
        )
    }

    pub fn write<F>(
        &mut self,
        connection: ConnectionHandle,
        handle: u16,
        value: Vec<u8>,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::Write,
            handle,
            Box::new(completion),
            |router, out| router.att_mut().write(handle, value, out),
        )
    }

    pub fn write_descriptor<F>(
        &mut self,
        connection: ConnectionHandle,
        handle: u16,
        value: Vec<u8>,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::WriteDescriptor,
            handle,
            Box::new(completion),
            |router, out| router.att_mut().write_descriptor(handle, value, out),
        )
    }

    /// Completes once the Write Command is handed to flow control, or after
    /// the Execute Write Response when the value needs a long write.
    pub fn write_without_response<F>(
        &mut self,
        connection: ConnectionHandle,
        handle: u16,
        value: Vec<u8>,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::WriteWithoutResponse,
            handle,
            Box::new(completion),
            |router, out| router.att_mut().write_without_response(handle, value, out),
        )
    }

    pub fn set_broadcast<F>(
        &mut self,
        connection: ConnectionHandle,
        handle: u16,
        enable: bool,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::SetBroadcast,
            handle,
            Box::new(completion),
            |router, out| router.att_mut().set_broadcast(handle, enable, out),
        )
    }

    /// Enable notifications, indications or both on a characteristic.
    /// [`ClientConfiguration::empty`] disables them.
    pub fn set_notify<F>(
        &mut self,
        connection: ConnectionHandle,
        handle: u16,
        config: ClientConfiguration,
        completion: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        self.submit(
            connection,
            Operation::SetNotify,
            handle,
            Box::new(completion),
            |router, out| router.att_mut().set_notify(handle, config, out),
        )
    }

    /// Pair and encrypt the link. Resolves at once if it is encrypted
    /// already; joins a pairing that is already underway.
    pub fn request_encryption<F>(&mut self, connection: ConnectionHandle, completion: F) -> Result<()>
    where
        F: FnOnce(Result<Outcome>) + 'static,
    {
        if self.stopped {
            completion(Err(Error::Stopped));
            return Ok(());
        }
        let Some(context) = self.connections.get_mut(connection) else {
            completion(Err(Error::UnknownConnection(connection)));
            return Ok(());
        };
        if context.security() >= SecurityLevel::Medium {
            completion(Ok(Outcome::Encrypted));
            return Ok(());
        }

        let key = CompletionKey {
            connection,
            operation: Operation::RequestEncryption,
            handle: 0,
        };
        self.completions.register(key, Box::new(completion));

        let mut out = LinkOutput::new(Instant::now());
        match context.router_mut().request_encryption(&mut out) {
            Ok(()) => {}
            Err(SmpError::PairingInProgress) => {
                debug!("Pairing already underway on {}", connection)
            }
            Err(e) => {
                self.completions.resolve(key, Err(Error::Security(e)));
            }
        }
        self.process_output(connection, out)
    }
}
