//! GATT client procedures
//!
//! Each procedure is a small state machine that turns one response into
//! either the next request or a final result. The engine owns sending,
//! retries and queueing; procedures only decide what to send.

use super::types::*;
use crate::att::*;
use crate::config::AttConfig;
use crate::error::{Error, ProtocolError};
use crate::uuid::Uuid;

/// Client operations, as seen by whoever waits for their completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ExchangeMtu,
    DiscoverServices,
    DiscoverIncludedServices,
    DiscoverCharacteristics,
    DiscoverDescriptors,
    Read,
    ReadDescriptor,
    Write,
    WriteDescriptor,
    WriteWithoutResponse,
    SetBroadcast,
    SetNotify,
    RequestEncryption,
}

/// Successful result of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Mtu(u16),
    Services(Vec<Service>),
    IncludedServices(Vec<IncludedService>),
    Characteristics(Vec<Characteristic>),
    Descriptors(Vec<Descriptor>),
    Value(Vec<u8>),
    Written,
    Broadcast(bool),
    Notify(ClientConfiguration),
    Encrypted,
}

/// What a procedure wants done next
#[derive(Debug)]
pub(crate) enum Step {
    /// Send a request and wait for `expects` (or an Error Response)
    Request { pdu: Vec<u8>, expects: u8 },
    /// Send a command; the procedure is finished once it is out
    Command { pdu: Vec<u8>, outcome: Option<Outcome> },
    Done(Result<Outcome, Error>),
}

/// Engine state a procedure may read or extend
pub(crate) struct StepContext<'a> {
    pub mtu: u16,
    pub config: &'a AttConfig,
    pub cache: &'a mut AttributeCache,
}

fn read_by_type(start_handle: u16, end_handle: u16, attribute_type: u16) -> Step {
    Step::Request {
        pdu: ReadByTypeRequest {
            start_handle,
            end_handle,
            attribute_type: Uuid::Uuid16(attribute_type),
        }
        .serialize(),
        expects: ATT_READ_BY_TYPE_RSP,
    }
}

fn peer_error(rsp: ErrorResponse) -> Step {
    Step::Done(Err(Error::Att(rsp.into_error())))
}

fn wanted(filter: &[Uuid], uuid: &Uuid) -> bool {
    filter.is_empty() || filter.iter().any(|f| f.matches(uuid))
}

/// Primary service discovery over the whole handle range
#[derive(Debug)]
pub(crate) struct ServiceDiscovery {
    filter: Vec<Uuid>,
    next_start: u16,
    found: Vec<Service>,
}

impl ServiceDiscovery {
    pub fn new(filter: Vec<Uuid>) -> Self {
        Self {
            filter,
            next_start: ATT_HANDLE_MIN,
            found: Vec::new(),
        }
    }

    fn request(&self) -> Step {
        Step::Request {
            pdu: ReadByGroupTypeRequest {
                start_handle: self.next_start,
                end_handle: ATT_HANDLE_MAX,
                group_type: Uuid::Uuid16(PRIMARY_SERVICE_UUID),
            }
            .serialize(),
            expects: ATT_READ_BY_GROUP_TYPE_RSP,
        }
    }

    fn finish(&mut self) -> Step {
        let services = std::mem::take(&mut self.found)
            .into_iter()
            .filter(|s| wanted(&self.filter, &s.uuid))
            .collect();
        Step::Done(Ok(Outcome::Services(services)))
    }

    fn on_response(&mut self, data: &[u8], ctx: &mut StepContext) -> AttResult<Step> {
        let rsp = ReadByGroupTypeResponse::parse(data)?;
        if rsp.length != 6 && rsp.length != 20 {
            return Err(AttError::InvalidPdu);
        }

        let Some(last_end) = rsp.data.last().map(|r| r.end_group_handle) else {
            return Ok(self.finish());
        };
        for record in rsp.data {
            let uuid = Uuid::from_le_slice(&record.value).ok_or(AttError::InvalidPdu)?;
            let service = Service {
                uuid,
                start_handle: record.handle,
                end_handle: record.end_group_handle,
            };
            ctx.cache.insert(AttributeRecord::Service(service.clone()));
            self.found.push(service);
        }

        if last_end == ATT_HANDLE_MAX || last_end < self.next_start {
            return Ok(self.finish());
        }
        self.next_start = last_end + 1;
        Ok(self.request())
    }
}

/// Include declarations inside one service
#[derive(Debug)]
pub(crate) struct IncludeDiscovery {
    end_handle: u16,
    filter: Vec<Uuid>,
    next_start: u16,
    found: Vec<IncludedService>,
}

impl IncludeDiscovery {
    pub fn new(start_handle: u16, end_handle: u16, filter: Vec<Uuid>) -> Self {
        Self {
            end_handle,
            filter,
            next_start: start_handle,
            found: Vec::new(),
        }
    }

    fn request(&self) -> Step {
        if self.next_start > self.end_handle {
            return self.finish();
        }
        read_by_type(self.next_start, self.end_handle, INCLUDE_UUID)
    }

    fn finish(&self) -> Step {
        let included = self
            .found
            .iter()
            .filter(|i| match &i.uuid {
                Some(uuid) => wanted(&self.filter, uuid),
                None => self.filter.is_empty(),
            })
            .cloned()
            .collect();
        Step::Done(Ok(Outcome::IncludedServices(included)))
    }

    fn on_response(&mut self, data: &[u8], ctx: &mut StepContext) -> AttResult<Step> {
        let rsp = ReadByTypeResponse::parse(data)?;
        if rsp.length != 6 && rsp.length != 8 {
            return Err(AttError::InvalidPdu);
        }

        let Some(last_declaration) = rsp.data.last().map(|r| r.handle) else {
            return Ok(self.finish());
        };
        for record in rsp.data {
            let v = &record.value;
            let included = IncludedService {
                declaration_handle: record.handle,
                start_handle: u16::from_le_bytes([v[0], v[1]]),
                end_handle: u16::from_le_bytes([v[2], v[3]]),
                uuid: (v.len() == 6).then(|| Uuid::Uuid16(u16::from_le_bytes([v[4], v[5]]))),
            };
            ctx.cache
                .insert(AttributeRecord::IncludedService(included.clone()));
            self.found.push(included);
        }

        if last_declaration >= self.end_handle || last_declaration < self.next_start {
            return Ok(self.finish());
        }
        self.next_start = last_declaration + 1;
        Ok(self.request())
    }
}

/// Characteristic declarations inside one service
#[derive(Debug)]
pub(crate) struct CharacteristicDiscovery {
    end_handle: u16,
    filter: Vec<Uuid>,
    next_start: u16,
    found: Vec<Characteristic>,
}

impl CharacteristicDiscovery {
    pub fn new(start_handle: u16, end_handle: u16, filter: Vec<Uuid>) -> Self {
        Self {
            end_handle,
            filter,
            next_start: start_handle,
            found: Vec::new(),
        }
    }

    fn request(&self) -> Step {
        read_by_type(self.next_start, self.end_handle, CHARACTERISTIC_UUID)
    }

    fn finish(&mut self, ctx: &mut StepContext) -> Step {
        let found = std::mem::take(&mut self.found);
        for characteristic in &found {
            ctx.cache
                .insert(AttributeRecord::Characteristic(characteristic.clone()));
        }
        let characteristics = found
            .into_iter()
            .filter(|c| wanted(&self.filter, &c.uuid))
            .collect();
        Step::Done(Ok(Outcome::Characteristics(characteristics)))
    }

    fn on_response(&mut self, data: &[u8], ctx: &mut StepContext) -> AttResult<Step> {
        let rsp = ReadByTypeResponse::parse(data)?;
        if rsp.length != 7 && rsp.length != 21 {
            return Err(AttError::InvalidPdu);
        }
        if rsp.data.is_empty() {
            return Ok(self.finish(ctx));
        }

        let mut last_value = 0;
        for record in rsp.data {
            let v = &record.value;
            let value_handle = u16::from_le_bytes([v[1], v[2]]);
            let uuid = Uuid::from_le_slice(&v[3..]).ok_or(AttError::InvalidPdu)?;

            // The previous characteristic ends just before this declaration
            if let Some(previous) = self.found.last_mut() {
                previous.end_handle = record.handle.saturating_sub(1);
            }
            self.found.push(Characteristic {
                uuid,
                declaration_handle: record.handle,
                value_handle,
                end_handle: self.end_handle,
                properties: CharacteristicProperties::from_bits_retain(v[0]),
            });
            last_value = value_handle;
        }

        if last_value >= self.end_handle || last_value < self.next_start {
            return Ok(self.finish(ctx));
        }
        self.next_start = last_value + 1;
        Ok(self.request())
    }
}

/// Descriptors between a characteristic's value and its end
#[derive(Debug)]
pub(crate) struct DescriptorDiscovery {
    value_handle: u16,
    end_handle: u16,
    next_start: u16,
    found: Vec<Descriptor>,
}

impl DescriptorDiscovery {
    pub fn new(value_handle: u16, end_handle: u16) -> Self {
        Self {
            value_handle,
            end_handle,
            next_start: value_handle.saturating_add(1),
            found: Vec::new(),
        }
    }

    fn request(&self) -> Step {
        if self.value_handle >= self.end_handle {
            return self.finish();
        }
        Step::Request {
            pdu: FindInformationRequest {
                start_handle: self.next_start,
                end_handle: self.end_handle,
            }
            .serialize(),
            expects: ATT_FIND_INFO_RSP,
        }
    }

    fn finish(&self) -> Step {
        Step::Done(Ok(Outcome::Descriptors(self.found.clone())))
    }

    fn on_response(&mut self, data: &[u8], ctx: &mut StepContext) -> AttResult<Step> {
        let rsp = FindInformationResponse::parse(data)?;

        let Some(last) = rsp.information_data.last().map(|p| p.handle) else {
            return Ok(self.finish());
        };
        for pair in rsp.information_data {
            let descriptor = Descriptor {
                handle: pair.handle,
                uuid: pair.uuid,
            };
            ctx.cache.insert(AttributeRecord::Descriptor(descriptor.clone()));
            self.found.push(descriptor);
        }

        if last >= self.end_handle || last < self.next_start {
            return Ok(self.finish());
        }
        self.next_start = last + 1;
        Ok(self.request())
    }
}

/// Read, continued with Read Blob while responses come back full
#[derive(Debug)]
pub(crate) struct ReadProcedure {
    handle: u16,
    value: Vec<u8>,
    blob: bool,
}

impl ReadProcedure {
    pub fn new(handle: u16) -> Self {
        Self {
            handle,
            value: Vec::new(),
            blob: false,
        }
    }

    fn on_response(&mut self, data: &[u8], ctx: &mut StepContext) -> AttResult<Step> {
        let chunk = if self.blob {
            ReadBlobResponse::parse(data)?.value
        } else {
            ReadResponse::parse(data)?.value
        };
        let full = chunk.len() == usize::from(ctx.mtu) - 1;
        self.value.extend_from_slice(&chunk);

        let offset = match u16::try_from(self.value.len()) {
            Ok(offset) if full => offset,
            _ => return Ok(Step::Done(Ok(Outcome::Value(std::mem::take(&mut self.value))))),
        };
        self.blob = true;
        Ok(Step::Request {
            pdu: ReadBlobRequest {
                handle: self.handle,
                offset,
            }
            .serialize(),
            expects: ATT_READ_BLOB_RSP,
        })
    }

    fn on_error(&mut self, rsp: ErrorResponse) -> Step {
        let end_of_value = matches!(
            rsp.error_code,
            AttErrorCode::InvalidOffset | AttErrorCode::AttributeNotLong
        );
        if self.blob && end_of_value {
            return Step::Done(Ok(Outcome::Value(std::mem::take(&mut self.value))));
        }
        peer_error(rsp)
    }
}

/// Write Request, Write Command, or a prepared long write
#[derive(Debug)]
pub(crate) struct WriteProcedure {
    handle: u16,
    value: Vec<u8>,
    without_response: bool,
    chunk_len: u16,
    offset: u16,
    executing: bool,
}

impl WriteProcedure {
    pub fn new(handle: u16, value: Vec<u8>, without_response: bool) -> Self {
        Self {
            handle,
            value,
            without_response,
            chunk_len: 0,
            offset: 0,
            executing: false,
        }
    }

    fn start(&mut self, ctx: &StepContext) -> Step {
        let mtu = usize::from(ctx.mtu);
        if self.value.len() <= mtu - 3 {
            return if self.without_response {
                Step::Command {
                    pdu: WriteCommand {
                        handle: self.handle,
                        value: self.value.clone(),
                    }
                    .serialize(),
                    outcome: Some(Outcome::Written),
                }
            } else {
                Step::Request {
                    pdu: WriteRequest {
                        handle: self.handle,
                        value: self.value.clone(),
                    }
                    .serialize(),
                    expects: ATT_WRITE_RSP,
                }
            };
        }

        self.chunk_len = ctx.mtu - 5;
        self.prepare()
    }

    fn chunk(&self) -> &[u8] {
        let start = usize::from(self.offset);
        let end = (start + usize::from(self.chunk_len)).min(self.value.len());
        &self.value[start..end]
    }

    fn prepare(&self) -> Step {
        Step::Request {
            pdu: PrepareWriteRequest {
                handle: self.handle,
                offset: self.offset,
                value: self.chunk().to_vec(),
            }
            .serialize(),
            expects: ATT_PREPARE_WRITE_RSP,
        }
    }

    fn on_response(&mut self, data: &[u8]) -> AttResult<Step> {
        if self.chunk_len == 0 {
            WriteResponse::parse(data)?;
            return Ok(Step::Done(Ok(Outcome::Written)));
        }
        if self.executing {
            ExecuteWriteResponse::parse(data)?;
            return Ok(Step::Done(Ok(Outcome::Written)));
        }

        let echo = PrepareWriteResponse::parse(data)?;
        if echo.handle != self.handle || echo.offset != self.offset || echo.value != self.chunk() {
            return Ok(Step::Done(Err(Error::Protocol(ProtocolError::EchoMismatch {
                handle: self.handle,
                offset: self.offset,
            }))));
        }

        // Values are at most 512 bytes, so the offset stays well inside u16
        self.offset += self.chunk_len;
        if usize::from(self.offset) < self.value.len() {
            return Ok(self.prepare());
        }
        self.executing = true;
        Ok(Step::Request {
            pdu: ExecuteWriteRequest {
                flags: ATT_EXEC_WRITE_COMMIT,
            }
            .serialize(),
            expects: ATT_EXECUTE_WRITE_RSP,
        })
    }
}

/// Which configuration descriptor a [`ConfigureProcedure`] edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// Server Characteristic Configuration, broadcast bit on or off
    Broadcast(bool),
    /// Client Characteristic Configuration bits to raise. Empty clears both.
    Notify(ClientConfiguration),
}

/// Read-modify-write of a characteristic configuration descriptor
#[derive(Debug)]
pub(crate) struct ConfigureProcedure {
    kind: ConfigKind,
    range: (u16, u16),
    descriptor: Option<u16>,
}

impl ConfigureProcedure {
    pub fn new(kind: ConfigKind, handle: u16, known: Option<&Characteristic>) -> Self {
        let range = match known {
            Some(c) => (c.declaration_handle, c.end_handle),
            None => (handle, handle.saturating_add(3)),
        };

        Self {
            kind,
            range,
            descriptor: None,
        }
    }

    fn descriptor_type(&self) -> u16 {
        match self.kind {
            ConfigKind::Broadcast(_) => SERVER_CHAR_CONFIG_UUID,
            ConfigKind::Notify(_) => CLIENT_CHAR_CONFIG_UUID,
        }
    }

    /// New descriptor value; bits outside the ones being edited are kept
    fn apply(&self, current: u16) -> u16 {
        match self.kind {
            ConfigKind::Broadcast(true) => current | SERVER_CONFIG_BROADCAST,
            ConfigKind::Broadcast(false) => current & !SERVER_CONFIG_BROADCAST,
            ConfigKind::Notify(bits) if bits.is_empty() => {
                current & !ClientConfiguration::all().bits()
            }
            ConfigKind::Notify(bits) => current | bits.bits(),
        }
    }

    fn on_response(&mut self, data: &[u8]) -> AttResult<Step> {
        if self.descriptor.is_some() {
            WriteResponse::parse(data)?;
            let outcome = match self.kind {
                ConfigKind::Broadcast(enable) => Outcome::Broadcast(enable),
                ConfigKind::Notify(bits) => Outcome::Notify(bits),
            };
            return Ok(Step::Done(Ok(outcome)));
        }

        let rsp = ReadByTypeResponse::parse(data)?;
        let Some(record) = rsp.data.first() else {
            return Ok(Step::Done(Err(Error::UnknownAttribute(self.range.0))));
        };
        let current = match record.value.as_slice() {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            [lo] => u16::from(*lo),
            [] => 0,
        };
        let config = self.apply(current);

        self.descriptor = Some(record.handle);
        Ok(Step::Request {
            pdu: WriteRequest {
                handle: record.handle,
                value: config.to_le_bytes().to_vec(),
            }
            .serialize(),
            expects: ATT_WRITE_RSP,
        })
    }
}

/// A queued client transaction's procedure
#[derive(Debug)]
pub(crate) enum Procedure {
    ExchangeMtu,
    DiscoverServices(ServiceDiscovery),
    DiscoverIncludedServices(IncludeDiscovery),
    DiscoverCharacteristics(CharacteristicDiscovery),
    DiscoverDescriptors(DescriptorDiscovery),
    Read(ReadProcedure),
    Write(WriteProcedure),
    Configure(ConfigureProcedure),
    /// Handle Value Confirmation for a received indication
    Confirm,
    /// Error Response for a request from the peer
    RejectRequest { opcode: u8 },
}

impl Procedure {
    /// First step, taken when the transaction reaches the head of the queue
    pub fn start(&mut self, ctx: &mut StepContext) -> Step {
        match self {
            Procedure::ExchangeMtu => Step::Request {
                pdu: ExchangeMtuRequest {
                    client_mtu: ctx.config.max_mtu,
                }
                .serialize(),
                expects: ATT_EXCHANGE_MTU_RSP,
            },
            Procedure::DiscoverServices(p) => p.request(),
            Procedure::DiscoverIncludedServices(p) => p.request(),
            Procedure::DiscoverCharacteristics(p) => p.request(),
            Procedure::DiscoverDescriptors(p) => p.request(),
            Procedure::Read(p) => Step::Request {
                pdu: ReadRequest { handle: p.handle }.serialize(),
                expects: ATT_READ_RSP,
            },
            Procedure::Write(p) => p.start(ctx),
            Procedure::Configure(p) => read_by_type(p.range.0, p.range.1, p.descriptor_type()),
            Procedure::Confirm => Step::Command {
                pdu: HandleValueConfirmation.serialize(),
                outcome: None,
            },
            Procedure::RejectRequest { opcode } => Step::Command {
                pdu: ErrorResponse {
                    request_opcode: *opcode,
                    handle: 0x0000,
                    error_code: AttErrorCode::RequestNotSupported,
                }
                .serialize(),
                outcome: None,
            },
        }
    }

    /// Feed the expected response. An error means the PDU was malformed and
    /// should be dropped without disturbing the procedure.
    pub fn on_response(&mut self, data: &[u8], ctx: &mut StepContext) -> AttResult<Step> {
        match self {
            Procedure::ExchangeMtu => {
                let rsp = ExchangeMtuResponse::parse(data)?;
                Ok(Step::Done(Ok(Outcome::Mtu(
                    ctx.config.negotiate_mtu(rsp.server_mtu),
                ))))
            }
            Procedure::DiscoverServices(p) => p.on_response(data, ctx),
            Procedure::DiscoverIncludedServices(p) => p.on_response(data, ctx),
            Procedure::DiscoverCharacteristics(p) => p.on_response(data, ctx),
            Procedure::DiscoverDescriptors(p) => p.on_response(data, ctx),
            Procedure::Read(p) => p.on_response(data, ctx),
            Procedure::Write(p) => p.on_response(data),
            Procedure::Configure(p) => p.on_response(data),
            Procedure::Confirm | Procedure::RejectRequest { .. } => {
                Err(AttError::UnexpectedOpcode {
                    expected: 0,
                    actual: data.first().copied().unwrap_or(0),
                })
            }
        }
    }

    /// Feed an Error Response to the outstanding request
    pub fn on_error(&mut self, rsp: ErrorResponse, ctx: &mut StepContext) -> Step {
        let not_found = rsp.error_code == AttErrorCode::AttributeNotFound;
        match self {
            Procedure::DiscoverServices(p) if not_found => p.finish(),
            Procedure::DiscoverIncludedServices(p) if not_found => p.finish(),
            Procedure::DiscoverCharacteristics(p) if not_found => p.finish(ctx),
            Procedure::DiscoverDescriptors(p) if not_found => p.finish(),
            Procedure::Read(p) => p.on_error(rsp),
            _ => peer_error(rsp),
        }
    }
}
