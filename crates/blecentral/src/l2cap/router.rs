//! Per-link channel routing
//!
//! A [`ChannelRouter`] owns the three fixed-channel engines of one LE link
//! and hands them inbound payloads by channel id. Engines never touch the
//! transport: what they send and what they report lands in a [`LinkOutput`]
//! which the host drains after every call.

use super::constants::*;
use super::signaling::SignalingEngine;
use crate::config::{AttConfig, SmpConfig};
use crate::gatt::{AttTransactionEngine, GattEvent};
use crate::hci::ConnectionParameters;
use crate::smp::{PairingAddresses, SmpError, SmpEvent, SmpPairingEngine, SmpResult};
use log::debug;
use std::time::Instant;

/// An L2CAP payload ready to be fragmented onto the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// ACL packet boundary flags for the first fragment
    pub flags: u8,
    pub channel_id: u16,
    pub payload: Vec<u8>,
}

/// Something an engine wants the host to know
#[derive(Debug)]
pub enum LinkEvent {
    Gatt(GattEvent),
    Smp(SmpEvent),
    /// Peer asked for new connection parameters and was told they are
    /// acceptable
    ConnectionParameterUpdateRequest(ConnectionParameters),
}

/// Outbox shared by the engines of one link for the duration of one call.
///
/// Carries the caller's notion of the current time; engines stamp what they
/// send with it and never read a clock themselves.
#[derive(Debug)]
pub struct LinkOutput {
    pub frames: Vec<OutboundFrame>,
    pub events: Vec<LinkEvent>,
    now: Instant,
    encryption_requested: bool,
}

impl LinkOutput {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: Vec::new(),
            events: Vec::new(),
            now,
            encryption_requested: false,
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn write(&mut self, flags: u8, channel_id: u16, payload: Vec<u8>) {
        self.frames.push(OutboundFrame {
            flags,
            channel_id,
            payload,
        });
    }

    pub fn emit(&mut self, event: LinkEvent) {
        self.events.push(event);
    }

    /// Ask for the link to be encrypted
    pub fn request_encryption(&mut self) {
        self.encryption_requested = true;
    }

    pub fn take_encryption_request(&mut self) -> bool {
        std::mem::take(&mut self.encryption_requested)
    }
}

/// Dispatches fixed-channel traffic for one link
#[derive(Debug)]
pub struct ChannelRouter {
    att: AttTransactionEngine,
    signaling: SignalingEngine,
    smp: SmpPairingEngine,
}

impl ChannelRouter {
    pub fn new(att: AttConfig, smp: SmpConfig, addresses: PairingAddresses) -> Self {
        Self {
            att: AttTransactionEngine::new(att),
            signaling: SignalingEngine::new(),
            smp: SmpPairingEngine::new(smp, addresses),
        }
    }

    pub fn att(&self) -> &AttTransactionEngine {
        &self.att
    }

    /// Client operations are issued here; follow them with
    /// [`ChannelRouter::settle`].
    pub fn att_mut(&mut self) -> &mut AttTransactionEngine {
        &mut self.att
    }

    pub fn smp(&self) -> &SmpPairingEngine {
        &self.smp
    }

    /// Deliver one reassembled L2CAP payload
    pub fn handle_frame(&mut self, channel_id: u16, payload: &[u8], out: &mut LinkOutput) {
        match channel_id {
            L2CAP_ATTRIBUTE_PROTOCOL_CID => self.att.handle_pdu(payload, out),
            L2CAP_LE_SIGNALING_CID => self.signaling.handle_pdu(payload, out),
            L2CAP_SECURITY_MANAGER_CID => {
                let first_new = out.events.len();
                self.smp.handle_pdu(payload, out);

                let failures: Vec<_> = out.events[first_new..]
                    .iter()
                    .filter_map(|event| match event {
                        LinkEvent::Smp(SmpEvent::Failed(error)) => Some(error.clone()),
                        _ => None,
                    })
                    .collect();
                for error in failures {
                    self.att.on_encryption_failed(error, out);
                }
            }
            other => debug!("Ignoring frame on unknown channel 0x{:04x}", other),
        }
        self.settle(out);
    }

    /// Start pairing if an engine asked for encryption and none is underway
    pub fn settle(&mut self, out: &mut LinkOutput) {
        if !out.take_encryption_request() {
            return;
        }
        if self.smp.in_progress() {
            debug!("Encryption requested while pairing is in progress");
            return;
        }
        // in_progress() was just checked
        let _ = self.smp.start_pairing(out);
    }

    /// Pair on request of the host
    pub fn request_encryption(&mut self, out: &mut LinkOutput) -> SmpResult<()> {
        self.smp.start_pairing(out)
    }

    /// Controller reported an Encryption Change for this link
    pub fn on_encryption_change(&mut self, enabled: bool, status: u8, out: &mut LinkOutput) {
        self.smp.on_encryption_change(enabled);
        if enabled {
            self.att.on_encryption_change(out);
        } else {
            self.att
                .on_encryption_failed(SmpError::EncryptionFailed(status), out);
        }
        self.settle(out);
    }

    pub fn handle_timeout(&mut self, now: Instant, out: &mut LinkOutput) {
        self.att.handle_timeout(now, out);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.att.next_deadline()
    }

    /// Stop every engine; the link is gone
    pub fn close(&mut self) {
        self.att.close();
        self.signaling.close();
        self.smp.close();
    }
}
