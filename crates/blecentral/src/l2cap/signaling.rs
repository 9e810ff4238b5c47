//! LE signaling channel
//!
//! A central only has to answer what the peripheral asks of it on this
//! channel. Connection parameter update requests are answered and reported
//! upward so the host can apply them with an LE Connection Update. Any other
//! request is rejected as not understood.

use super::constants::*;
use super::packet::SignalingMessage;
use super::router::{LinkEvent, LinkOutput};
use crate::hci::constants::ACL_START_NO_FLUSH;
use crate::hci::ConnectionParameters;
use log::{debug, warn};

const CONN_INTERVAL_MIN: u16 = 0x0006;
const CONN_INTERVAL_MAX: u16 = 0x0C80;
const CONN_LATENCY_MAX: u16 = 0x01F3;
const SUPERVISION_TIMEOUT_MIN: u16 = 0x000A;
const SUPERVISION_TIMEOUT_MAX: u16 = 0x0C80;

/// Whether the peer's requested parameters are within the ranges the
/// controller accepts.
pub fn parameters_valid(p: &ConnectionParameters) -> bool {
    let interval_ok = p.interval_min >= CONN_INTERVAL_MIN
        && p.interval_max <= CONN_INTERVAL_MAX
        && p.interval_min <= p.interval_max;
    let latency_ok = p.latency <= CONN_LATENCY_MAX;
    let timeout_ok = p.supervision_timeout >= SUPERVISION_TIMEOUT_MIN
        && p.supervision_timeout <= SUPERVISION_TIMEOUT_MAX;

    interval_ok && latency_ok && timeout_ok
}

/// Per-link LE signaling channel engine
#[derive(Debug, Default)]
pub struct SignalingEngine {
    closed: bool,
}

impl SignalingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self, message: SignalingMessage, out: &mut LinkOutput) {
        out.write(ACL_START_NO_FLUSH, L2CAP_LE_SIGNALING_CID, message.serialize());
    }

    /// Handle one inbound signaling PDU
    pub fn handle_pdu(&mut self, data: &[u8], out: &mut LinkOutput) {
        if self.closed {
            return;
        }

        let message = match SignalingMessage::parse(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping signaling PDU: {}", e);
                return;
            }
        };

        match message {
            SignalingMessage::ConnectionParameterUpdateRequest {
                identifier,
                parameters,
            } => {
                debug!("Connection parameter update requested: {:?}", parameters);
                let accepted = parameters_valid(&parameters);
                let result = if accepted {
                    L2CAP_CONN_PARAM_ACCEPTED
                } else {
                    L2CAP_CONN_PARAM_REJECTED
                };
                self.write(
                    SignalingMessage::ConnectionParameterUpdateResponse { identifier, result },
                    out,
                );
                if accepted {
                    out.emit(LinkEvent::ConnectionParameterUpdateRequest(parameters));
                }
            }
            SignalingMessage::CommandReject { reason, .. } => {
                debug!("Peer rejected a signaling command, reason 0x{:04x}", reason);
            }
            SignalingMessage::ConnectionParameterUpdateResponse { .. } => {
                debug!("Ignoring unsolicited connection parameter update response");
            }
            SignalingMessage::Other { code, identifier, .. } => {
                debug!("Rejecting signaling command 0x{:02x}", code);
                self.write(
                    SignalingMessage::CommandReject {
                        identifier,
                        reason: L2CAP_REJECT_NOT_UNDERSTOOD,
                        data: Vec::new(),
                    },
                    out,
                );
            }
        }
    }

    /// Stop answering; the link is gone
    pub fn close(&mut self) {
        self.closed = true;
    }
}
