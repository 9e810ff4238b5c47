//! Just Works pairing as initiator
//!
//! The engine walks `Idle -> RequestSent -> ConfirmSent -> RandomSent` and
//! ends in `StkReady` or `Failed`. The short term key is handed upward as an
//! [`SmpEvent::Stk`]; starting encryption with it is the host's job. The
//! pairing stays in progress through `StkReady` until the Encryption Change
//! comes back, which returns the engine to `Idle`.

use super::constants::*;
use super::crypto;
use super::pairing::*;
use super::types::*;
use crate::config::SmpConfig;
use crate::hci::constants::ACL_START_NO_FLUSH;
use crate::l2cap::router::{LinkEvent, LinkOutput};
use log::{debug, warn};

/// Values that only live for the duration of one pairing
#[derive(Debug, Clone)]
struct PairingContext {
    tk: [u8; 16],
    local_random: [u8; 16],
    peer_confirm: Option<[u8; 16]>,
    preq: [u8; 7],
    pres: Option<[u8; 7]>,
}

/// Per-link SMP state machine
#[derive(Debug)]
pub struct SmpPairingEngine {
    config: SmpConfig,
    addresses: PairingAddresses,
    state: PairingState,
    context: Option<PairingContext>,
    closed: bool,
}

impl SmpPairingEngine {
    pub fn new(config: SmpConfig, addresses: PairingAddresses) -> Self {
        Self {
            config,
            addresses,
            state: PairingState::Idle,
            context: None,
            closed: false,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Whether a pairing has been started and the link is not yet encrypted
    /// with its result. An STK counts until the controller reports back.
    pub fn in_progress(&self) -> bool {
        matches!(
            self.state,
            PairingState::RequestSent
                | PairingState::ConfirmSent
                | PairingState::RandomSent
                | PairingState::StkReady
        )
    }

    fn write(&self, packet: &[u8], out: &mut LinkOutput) {
        out.write(ACL_START_NO_FLUSH, SMP_CID, packet.to_vec());
    }

    /// Send a Pairing Request built from the configuration
    pub fn start_pairing(&mut self, out: &mut LinkOutput) -> SmpResult<()> {
        if self.in_progress() {
            return Err(SmpError::PairingInProgress);
        }
        if self.closed {
            return Ok(());
        }

        let request = PairingRequest {
            io_capability: self.config.io_capability.to_u8(),
            oob_data_present: u8::from(self.config.oob_data_present),
            auth_req: self.config.auth_req,
            max_key_size: self.config.max_key_size,
            initiator_key_dist: self.config.initiator_key_dist,
            responder_key_dist: self.config.responder_key_dist,
        };
        let preq = request.serialize(true);

        debug!("Starting Just Works pairing");
        self.context = Some(PairingContext {
            tk: [0u8; 16],
            local_random: [0u8; 16],
            peer_confirm: None,
            preq,
            pres: None,
        });
        self.state = PairingState::RequestSent;
        self.write(&preq, out);
        Ok(())
    }

    /// Handle one inbound SMP PDU
    pub fn handle_pdu(&mut self, data: &[u8], out: &mut LinkOutput) {
        if self.closed {
            return;
        }

        let pdu = match SmpPdu::parse(data) {
            Ok(pdu) => pdu,
            Err(e) => {
                warn!("Dropping SMP PDU: {}", e);
                return;
            }
        };

        match (self.state, pdu) {
            (PairingState::RequestSent, SmpPdu::PairingResponse(response)) => {
                self.on_pairing_response(response, data, out)
            }
            (PairingState::ConfirmSent, SmpPdu::PairingConfirm(confirm)) => {
                self.on_pairing_confirm(confirm, out)
            }
            (PairingState::RandomSent, SmpPdu::PairingRandom(random)) => {
                self.on_pairing_random(random, out)
            }
            (_, SmpPdu::PairingFailed(failed)) => {
                if self.in_progress() {
                    debug!("Peer failed pairing: {}", failed.reason);
                    self.fail(SmpError::PairingFailed(failed.reason), out);
                }
            }
            (_, SmpPdu::EncryptionInformation(info)) => {
                out.emit(LinkEvent::Smp(SmpEvent::Ltk(info.long_term_key)));
            }
            (_, SmpPdu::MasterIdentification(id)) => {
                out.emit(LinkEvent::Smp(SmpEvent::MasterIdentification {
                    ediv: id.ediv,
                    rand: id.rand,
                }));
            }
            (state, SmpPdu::SecurityRequest(request)) => {
                if self.in_progress() {
                    debug!("Ignoring security request in state {:?}", state);
                } else {
                    debug!("Peer requested security, auth 0x{:02x}", request.auth_req.bits());
                    // in_progress() was just checked, so this cannot fail
                    let _ = self.start_pairing(out);
                }
            }
            (state, pdu) => {
                warn!("Unexpected SMP PDU {:?} in state {:?}", pdu, state);
            }
        }
    }

    fn on_pairing_response(&mut self, response: PairingRequest, data: &[u8], out: &mut LinkOutput) {
        if response.max_key_size < SMP_MIN_ENCRYPTION_KEY_SIZE
            || response.max_key_size > SMP_MAX_ENCRYPTION_KEY_SIZE
        {
            self.reject(FailureReason::EncryptionKeySize, out);
            return;
        }
        let Some(ctx) = self.context.as_mut() else {
            return;
        };

        let mut pres = [0u8; 7];
        pres.copy_from_slice(&data[..7]);
        ctx.pres = Some(pres);
        ctx.tk = [0u8; 16];
        ctx.local_random = crypto::generate_random_128();

        let a = self.addresses;
        let confirm = crypto::c1(
            &ctx.tk,
            &ctx.local_random,
            &ctx.preq,
            &pres,
            a.initiator_type,
            &a.initiator,
            a.responder_type,
            &a.responder,
        );

        self.state = PairingState::ConfirmSent;
        self.write(&PairingConfirm { confirm_value: confirm }.serialize(), out);
    }

    fn on_pairing_confirm(&mut self, confirm: PairingConfirm, out: &mut LinkOutput) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        ctx.peer_confirm = Some(confirm.confirm_value);
        let random = PairingRandom {
            random_value: ctx.local_random,
        };

        self.state = PairingState::RandomSent;
        self.write(&random.serialize(), out);
    }

    fn on_pairing_random(&mut self, random: PairingRandom, out: &mut LinkOutput) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let (Some(pres), Some(peer_confirm)) = (ctx.pres, ctx.peer_confirm) else {
            return;
        };

        let a = self.addresses;
        let expected = crypto::c1(
            &ctx.tk,
            &random.random_value,
            &ctx.preq,
            &pres,
            a.initiator_type,
            &a.initiator,
            a.responder_type,
            &a.responder,
        );

        if expected != peer_confirm {
            warn!("Peer confirm value does not match its random");
            self.reject(FailureReason::ConfirmValueFailed, out);
            return;
        }

        let stk = crypto::s1(&ctx.tk, &random.random_value, &ctx.local_random);
        debug!("Pairing complete, STK ready");
        self.context = None;
        self.state = PairingState::StkReady;
        out.emit(LinkEvent::Smp(SmpEvent::Stk(stk)));
    }

    /// Send Pairing Failed and report the failure
    fn reject(&mut self, reason: FailureReason, out: &mut LinkOutput) {
        self.write(&PairingFailed { reason }.serialize(), out);
        let error = match reason {
            FailureReason::ConfirmValueFailed => SmpError::ConfirmValueFailed,
            _ => SmpError::InvalidParameter("Pairing response rejected"),
        };
        self.fail(error, out);
    }

    fn fail(&mut self, error: SmpError, out: &mut LinkOutput) {
        self.context = None;
        self.state = PairingState::Failed;
        out.emit(LinkEvent::Smp(SmpEvent::Failed(error)));
    }

    /// Controller finished starting encryption with the STK
    pub fn on_encryption_change(&mut self, enabled: bool) {
        if self.state != PairingState::StkReady {
            return;
        }
        self.state = if enabled {
            PairingState::Idle
        } else {
            PairingState::Failed
        };
    }

    /// Drop any pairing in progress; the link is gone
    pub fn close(&mut self) {
        self.closed = true;
        self.context = None;
        if self.in_progress() {
            self.state = PairingState::Failed;
        }
    }
}
