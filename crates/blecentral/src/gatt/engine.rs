//! ATT transaction engine
//!
//! One per link. Client operations are queued in FIFO order and at most one
//! request is outstanding at any time. A request that gets no answer within
//! [`AttConfig::timeout`] is sent again, for as long as the link is up.
//!
//! Peer errors that mean "encrypt the link first" do not fail the
//! transaction while the link is unencrypted; the engine asks for encryption
//! and keeps the request outstanding.

use super::procedure::*;
use super::types::*;
use crate::att::*;
use crate::config::AttConfig;
use crate::error::Error;
use crate::hci::constants::ACL_START_NO_FLUSH;
use crate::l2cap::router::{LinkEvent, LinkOutput};
use crate::smp::SmpError;
use crate::uuid::Uuid;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::time::Instant;

/// Link security as far as ATT is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    /// Unencrypted
    Low,
    /// Encrypted with an unauthenticated key
    Medium,
    /// Encrypted with an authenticated key
    High,
}

/// Events from the ATT engine
#[derive(Debug)]
pub enum GattEvent {
    Completed {
        operation: Operation,
        /// Attribute the operation was keyed on, 0 for link-wide operations
        handle: u16,
        result: Result<Outcome, Error>,
    },
    Notification {
        handle: u16,
        value: Vec<u8>,
        /// Set for indications, which the engine has already confirmed
        indication: bool,
    },
}

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Queued,
    AwaitingResponse,
    /// Sent again after a timeout, still waiting
    Retrying,
    Done,
}

#[derive(Debug)]
struct Transaction {
    /// `None` for replies the engine sends on its own behalf
    operation: Option<Operation>,
    handle: u16,
    procedure: Procedure,
    state: TransactionState,
    request: Vec<u8>,
    expects: u8,
    sent_at: Option<Instant>,
    awaiting_encryption: bool,
}

impl Transaction {
    fn new(operation: Option<Operation>, handle: u16, procedure: Procedure) -> Self {
        Self {
            operation,
            handle,
            procedure,
            state: TransactionState::Queued,
            request: Vec::new(),
            expects: 0,
            sent_at: None,
            awaiting_encryption: false,
        }
    }
}

/// GATT client transaction state machine for one link
#[derive(Debug)]
pub struct AttTransactionEngine {
    config: AttConfig,
    mtu: u16,
    security: SecurityLevel,
    cache: AttributeCache,
    queue: VecDeque<Transaction>,
    in_flight: Option<Transaction>,
    closed: bool,
}

impl AttTransactionEngine {
    pub fn new(config: AttConfig) -> Self {
        Self {
            config,
            mtu: ATT_DEFAULT_MTU,
            security: SecurityLevel::Low,
            cache: AttributeCache::new(),
            queue: VecDeque::new(),
            in_flight: None,
            closed: false,
        }
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn security(&self) -> SecurityLevel {
        self.security
    }

    pub fn cache(&self) -> &AttributeCache {
        &self.cache
    }

    /// State of the outstanding transaction, if any
    pub fn in_flight_state(&self) -> Option<TransactionState> {
        self.in_flight.as_ref().map(|tx| tx.state)
    }

    /// Transactions waiting behind the outstanding one
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn exchange_mtu(&mut self, out: &mut LinkOutput) {
        self.enqueue(Operation::ExchangeMtu, 0, Procedure::ExchangeMtu, out);
    }

    /// Discover primary services, keeping only those in `filter` if it is
    /// not empty.
    pub fn discover_services(&mut self, filter: Vec<Uuid>, out: &mut LinkOutput) {
        let procedure = Procedure::DiscoverServices(ServiceDiscovery::new(filter));
        self.enqueue(Operation::DiscoverServices, 0, procedure, out);
    }

    pub fn discover_included_services(
        &mut self,
        service: &Service,
        filter: Vec<Uuid>,
        out: &mut LinkOutput,
    ) {
        let procedure = Procedure::DiscoverIncludedServices(IncludeDiscovery::new(
            service.start_handle,
            service.end_handle,
            filter,
        ));
        self.enqueue(
            Operation::DiscoverIncludedServices,
            service.start_handle,
            procedure,
            out,
        );
    }

    pub fn discover_characteristics(
        &mut self,
        service: &Service,
        filter: Vec<Uuid>,
        out: &mut LinkOutput,
    ) {
        let procedure = Procedure::DiscoverCharacteristics(CharacteristicDiscovery::new(
            service.start_handle,
            service.end_handle,
            filter,
        ));
        self.enqueue(
            Operation::DiscoverCharacteristics,
            service.start_handle,
            procedure,
            out,
        );
    }

    /// Discover the descriptors of a characteristic found by an earlier
    /// characteristic discovery.
    pub fn discover_descriptors(&mut self, value_handle: u16, out: &mut LinkOutput) {
        let Some(characteristic) = self.cache.characteristic(value_handle) else {
            self.fail_now(
                Operation::DiscoverDescriptors,
                value_handle,
                Error::UnknownAttribute(value_handle),
                out,
            );
            return;
        };
        let procedure = Procedure::DiscoverDescriptors(DescriptorDiscovery::new(
            value_handle,
            characteristic.end_handle,
        ));
        self.enqueue(Operation::DiscoverDescriptors, value_handle, procedure, out);
    }

    pub fn read(&mut self, handle: u16, out: &mut LinkOutput) {
        let procedure = Procedure::Read(ReadProcedure::new(handle));
        self.enqueue(Operation::Read, handle, procedure, out);
    }

    pub fn read_descriptor(&mut self, handle: u16, out: &mut LinkOutput) {
        let procedure = Procedure::Read(ReadProcedure::new(handle));
        self.enqueue(Operation::ReadDescriptor, handle, procedure, out);
    }

    pub fn write(&mut self, handle: u16, value: Vec<u8>, out: &mut LinkOutput) {
        self.enqueue_write(Operation::Write, handle, value, false, out);
    }

    pub fn write_descriptor(&mut self, handle: u16, value: Vec<u8>, out: &mut LinkOutput) {
        self.enqueue_write(Operation::WriteDescriptor, handle, value, false, out);
    }

    /// Write Command when the value fits, otherwise a long write
    pub fn write_without_response(&mut self, handle: u16, value: Vec<u8>, out: &mut LinkOutput) {
        self.enqueue_write(Operation::WriteWithoutResponse, handle, value, true, out);
    }

    fn enqueue_write(
        &mut self,
        operation: Operation,
        handle: u16,
        value: Vec<u8>,
        without_response: bool,
        out: &mut LinkOutput,
    ) {
        if value.len() > ATT_MAX_VALUE_LEN {
            warn!(
                "Refusing {:?} of {} bytes to handle 0x{:04x}",
                operation,
                value.len(),
                handle
            );
            self.fail_now(operation, handle, Error::ValueTooLong(value.len()), out);
            return;
        }
        let procedure = Procedure::Write(WriteProcedure::new(handle, value, without_response));
        self.enqueue(operation, handle, procedure, out);
    }

    pub fn set_broadcast(&mut self, handle: u16, enable: bool, out: &mut LinkOutput) {
        let known = self.cache.characteristic(handle);
        let procedure = Procedure::Configure(ConfigureProcedure::new(
            ConfigKind::Broadcast(enable),
            handle,
            known,
        ));
        self.enqueue(Operation::SetBroadcast, handle, procedure, out);
    }

    /// Raise `config` in the characteristic's Client Characteristic
    /// Configuration. An empty set turns notifications and indications off.
    pub fn set_notify(&mut self, handle: u16, config: ClientConfiguration, out: &mut LinkOutput) {
        let known = self.cache.characteristic(handle);
        let procedure = Procedure::Configure(ConfigureProcedure::new(
            ConfigKind::Notify(config),
            handle,
            known,
        ));
        self.enqueue(Operation::SetNotify, handle, procedure, out);
    }

    fn enqueue(&mut self, operation: Operation, handle: u16, procedure: Procedure, out: &mut LinkOutput) {
        self.push(Transaction::new(Some(operation), handle, procedure), out);
    }

    fn push(&mut self, tx: Transaction, out: &mut LinkOutput) {
        if self.closed {
            if let Some(operation) = tx.operation {
                debug!("ATT engine closed, dropping {:?}", operation);
            }
            return;
        }
        self.queue.push_back(tx);
        self.pump(out);
    }

    fn fail_now(&mut self, operation: Operation, handle: u16, error: Error, out: &mut LinkOutput) {
        out.emit(LinkEvent::Gatt(GattEvent::Completed {
            operation,
            handle,
            result: Err(error),
        }));
    }

    fn context(&mut self) -> StepContext<'_> {
        StepContext {
            mtu: self.mtu,
            config: &self.config,
            cache: &mut self.cache,
        }
    }

    /// Start queued transactions until one is left waiting for a response
    fn pump(&mut self, out: &mut LinkOutput) {
        while self.in_flight.is_none() && !self.closed {
            let Some(mut tx) = self.queue.pop_front() else {
                break;
            };
            let step = tx.procedure.start(&mut self.context());
            self.advance(tx, step, out);
        }
    }

    fn send(&self, pdu: &[u8], out: &mut LinkOutput) {
        trace!("ATT tx {}", hex::encode(pdu));
        out.write(ACL_START_NO_FLUSH, ATT_CID, pdu.to_vec());
    }

    fn advance(&mut self, mut tx: Transaction, step: Step, out: &mut LinkOutput) {
        match step {
            Step::Request { pdu, expects } => {
                self.send(&pdu, out);
                tx.request = pdu;
                tx.expects = expects;
                tx.sent_at = Some(out.now());
                tx.state = TransactionState::AwaitingResponse;
                self.in_flight = Some(tx);
            }
            Step::Command { pdu, outcome } => {
                self.send(&pdu, out);
                tx.state = TransactionState::Done;
                if let Some(outcome) = outcome {
                    self.complete(tx, Ok(outcome), out);
                }
            }
            Step::Done(result) => {
                tx.state = TransactionState::Done;
                if let Ok(Outcome::Mtu(mtu)) = &result {
                    debug!("ATT MTU is now {}", mtu);
                    self.mtu = *mtu;
                }
                self.complete(tx, result, out);
            }
        }
    }

    fn complete(&mut self, tx: Transaction, result: Result<Outcome, Error>, out: &mut LinkOutput) {
        match tx.operation {
            Some(operation) => out.emit(LinkEvent::Gatt(GattEvent::Completed {
                operation,
                handle: tx.handle,
                result,
            })),
            None => {
                if let Err(e) = result {
                    debug!("Internal ATT reply failed: {}", e);
                }
            }
        }
    }

    /// Handle one inbound ATT PDU
    pub fn handle_pdu(&mut self, data: &[u8], out: &mut LinkOutput) {
        if self.closed {
            return;
        }
        let Some(&opcode) = data.first() else {
            warn!("Dropping empty ATT PDU");
            return;
        };
        trace!("ATT rx {}", hex::encode(data));

        match opcode {
            ATT_HANDLE_VALUE_NTF => match HandleValueNotification::parse(data) {
                Ok(ntf) => out.emit(LinkEvent::Gatt(GattEvent::Notification {
                    handle: ntf.handle,
                    value: ntf.value,
                    indication: false,
                })),
                Err(e) => warn!("Dropping notification: {}", e),
            },
            ATT_HANDLE_VALUE_IND => match HandleValueIndication::parse(data) {
                Ok(ind) => {
                    out.emit(LinkEvent::Gatt(GattEvent::Notification {
                        handle: ind.handle,
                        value: ind.value,
                        indication: true,
                    }));
                    self.push(Transaction::new(None, ind.handle, Procedure::Confirm), out);
                }
                Err(e) => warn!("Dropping indication: {}", e),
            },
            ATT_ERROR_RSP => self.on_error_response(data, out),
            op if is_request(op) => {
                debug!("Rejecting ATT request 0x{:02x}, no server role", op);
                self.push(
                    Transaction::new(None, 0, Procedure::RejectRequest { opcode: op }),
                    out,
                );
            }
            op if is_command(op) || op == ATT_HANDLE_VALUE_CONF => {
                debug!("Ignoring ATT PDU 0x{:02x}", op);
            }
            op => self.on_response(op, data, out),
        }

        self.pump(out);
    }

    fn on_response(&mut self, opcode: u8, data: &[u8], out: &mut LinkOutput) {
        let Some(mut tx) = self.in_flight.take() else {
            warn!("Unexpected ATT response 0x{:02x} with nothing outstanding", opcode);
            return;
        };
        if tx.expects != opcode {
            warn!(
                "Unexpected ATT response 0x{:02x}, waiting for 0x{:02x}",
                opcode, tx.expects
            );
            self.in_flight = Some(tx);
            return;
        }

        let result = tx.procedure.on_response(data, &mut self.context());
        match result {
            Ok(step) => {
                tx.awaiting_encryption = false;
                self.advance(tx, step, out)
            }
            Err(e) => {
                warn!("Dropping malformed ATT response 0x{:02x}: {}", opcode, e);
                self.in_flight = Some(tx);
            }
        }
    }

    fn on_error_response(&mut self, data: &[u8], out: &mut LinkOutput) {
        let rsp = match ErrorResponse::parse(data) {
            Ok(rsp) => rsp,
            Err(e) => {
                warn!("Dropping malformed Error Response: {}", e);
                return;
            }
        };
        let Some(mut tx) = self.in_flight.take() else {
            warn!("Error Response with nothing outstanding");
            return;
        };
        if tx.request.first() != Some(&rsp.request_opcode) {
            warn!(
                "Error Response for request 0x{:02x} does not match outstanding request",
                rsp.request_opcode
            );
            self.in_flight = Some(tx);
            return;
        }

        if rsp.error_code.requires_encryption() && self.security == SecurityLevel::Low {
            debug!(
                "{:?} on handle 0x{:04x}, requesting encryption",
                rsp.error_code, rsp.handle
            );
            tx.awaiting_encryption = true;
            self.in_flight = Some(tx);
            out.request_encryption();
            return;
        }

        let step = tx.procedure.on_error(rsp, &mut self.context());
        self.advance(tx, step, out);
    }

    /// Resend the outstanding request if it has waited too long
    pub fn handle_timeout(&mut self, now: Instant, out: &mut LinkOutput) {
        if self.closed {
            return;
        }
        let timeout = self.config.timeout;
        let Some(tx) = self.in_flight.as_mut() else {
            return;
        };
        let Some(sent_at) = tx.sent_at else {
            return;
        };
        if now.saturating_duration_since(sent_at) < timeout {
            return;
        }

        debug!("ATT request 0x{:02x} timed out, resending", tx.request[0]);
        tx.sent_at = Some(now);
        tx.state = TransactionState::Retrying;
        let request = tx.request.clone();
        self.send(&request, out);
    }

    /// When the outstanding request is due to be resent
    pub fn next_deadline(&self) -> Option<Instant> {
        let tx = self.in_flight.as_ref()?;
        Some(tx.sent_at? + self.config.timeout)
    }

    /// The link became encrypted. A request held back for encryption is
    /// sent again straight away.
    pub fn on_encryption_change(&mut self, out: &mut LinkOutput) {
        if self.security < SecurityLevel::Medium {
            self.security = SecurityLevel::Medium;
        }
        debug!("ATT security now {:?}", self.security);

        if let Some(tx) = self.in_flight.as_mut() {
            if tx.awaiting_encryption {
                tx.awaiting_encryption = false;
                tx.sent_at = Some(out.now());
                let request = tx.request.clone();
                self.send(&request, out);
            }
        }
    }

    /// Encryption could not be established; fail the request waiting on it.
    pub fn on_encryption_failed(&mut self, error: SmpError, out: &mut LinkOutput) {
        let waiting = self
            .in_flight
            .as_ref()
            .is_some_and(|tx| tx.awaiting_encryption);
        if !waiting {
            return;
        }
        if let Some(tx) = self.in_flight.take() {
            self.complete(tx, Err(Error::Security(error)), out);
        }
        self.pump(out);
    }

    /// Drop all queued and outstanding work; the link is gone
    pub fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
        self.in_flight = None;
    }
}
