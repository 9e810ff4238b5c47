//! Tests for the L2CAP implementation

use super::constants::*;
use super::packet::*;
use super::router::*;
use super::signaling::*;
use super::types::*;
use crate::config::{AttConfig, SmpConfig};
use crate::gatt::{GattEvent, Operation, Outcome};
use crate::hci::ConnectionParameters;
use crate::smp::PairingAddresses;
use std::time::Instant;

fn output() -> LinkOutput {
    LinkOutput::new(Instant::now())
}

fn router() -> ChannelRouter {
    let addresses = PairingAddresses {
        initiator_type: 0,
        initiator: [0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
        responder_type: 1,
        responder: [0x11, 0x12, 0x13, 0x14, 0x15, 0xC6],
    };
    ChannelRouter::new(AttConfig::default(), SmpConfig::default(), addresses)
}

fn update_request(identifier: u8, parameters: ConnectionParameters) -> Vec<u8> {
    SignalingMessage::ConnectionParameterUpdateRequest {
        identifier,
        parameters,
    }
    .serialize()
}

#[test]
fn test_l2cap_header() {
    let header = L2capHeader::new(0x0007, L2CAP_ATTRIBUTE_PROTOCOL_CID);
    assert_eq!(header.to_bytes(), [0x07, 0x00, 0x04, 0x00]);
    assert_eq!(L2capHeader::parse(&[0x07, 0x00, 0x04, 0x00]), Some(header));
    assert_eq!(L2capHeader::parse(&[0x07, 0x00, 0x04]), None);
}

#[test]
fn test_signaling_message_layout() {
    let parameters = ConnectionParameters {
        interval_min: 0x0018,
        interval_max: 0x0028,
        latency: 0x0000,
        supervision_timeout: 0x01F4,
    };
    let bytes = update_request(0x07, parameters);
    assert_eq!(
        bytes,
        vec![0x12, 0x07, 0x08, 0x00, 0x18, 0x00, 0x28, 0x00, 0x00, 0x00, 0xF4, 0x01]
    );
    assert_eq!(
        SignalingMessage::parse(&bytes).unwrap(),
        SignalingMessage::ConnectionParameterUpdateRequest {
            identifier: 0x07,
            parameters,
        }
    );
}

#[test]
fn test_signaling_parse_truncated() {
    assert!(matches!(
        SignalingMessage::parse(&[0x12, 0x01]),
        Err(L2capError::Truncated { .. })
    ));
    // Declared length longer than the data
    assert!(matches!(
        SignalingMessage::parse(&[0x12, 0x01, 0x08, 0x00, 0x06, 0x00]),
        Err(L2capError::Truncated { .. })
    ));
}

#[test]
fn test_parameter_update_is_answered_with_same_identifier() {
    let mut engine = SignalingEngine::new();
    let mut out = output();
    let parameters = ConnectionParameters {
        interval_min: 0x0010,
        interval_max: 0x0020,
        latency: 0,
        supervision_timeout: 0x0100,
    };

    engine.handle_pdu(&update_request(0x2A, parameters), &mut out);

    assert_eq!(out.frames.len(), 1);
    assert_eq!(out.frames[0].channel_id, L2CAP_LE_SIGNALING_CID);
    assert_eq!(out.frames[0].payload, vec![0x13, 0x2A, 0x02, 0x00, 0x00, 0x00]);
    assert!(matches!(
        out.events.as_slice(),
        [LinkEvent::ConnectionParameterUpdateRequest(p)] if *p == parameters
    ));
}

#[test]
fn test_invalid_parameter_update_is_rejected() {
    let mut engine = SignalingEngine::new();
    let mut out = output();
    let parameters = ConnectionParameters {
        interval_min: 0x0020,
        interval_max: 0x0010,
        latency: 0,
        supervision_timeout: 0x0100,
    };
    assert!(!parameters_valid(&parameters));

    engine.handle_pdu(&update_request(0x03, parameters), &mut out);

    assert_eq!(out.frames[0].payload, vec![0x13, 0x03, 0x02, 0x00, 0x01, 0x00]);
    assert!(out.events.is_empty());
}

#[test]
fn test_unknown_signaling_command_is_rejected() {
    let mut engine = SignalingEngine::new();
    let mut out = output();

    engine.handle_pdu(
        &[L2CAP_LE_CREDIT_BASED_CONNECTION_REQUEST, 0x05, 0x02, 0x00, 0x80, 0x00],
        &mut out,
    );

    assert_eq!(out.frames[0].payload, vec![0x01, 0x05, 0x02, 0x00, 0x00, 0x00]);
}

#[test]
fn test_closed_signaling_engine_is_silent() {
    let mut engine = SignalingEngine::new();
    let mut out = output();
    engine.close();

    engine.handle_pdu(&update_request(0x01, ConnectionParameters::default()), &mut out);
    assert!(out.frames.is_empty());
}

#[test]
fn test_router_dispatches_by_channel() {
    let mut router = router();
    let mut out = output();

    // Notification on the ATT channel
    router.handle_frame(L2CAP_ATTRIBUTE_PROTOCOL_CID, &[0x1B, 0x10, 0x00, 0xAB], &mut out);
    assert!(matches!(
        out.events.as_slice(),
        [LinkEvent::Gatt(GattEvent::Notification { handle: 0x0010, indication: false, .. })]
    ));

    // Unknown channel is ignored
    let mut out = output();
    router.handle_frame(0x0040, &[0x01, 0x02], &mut out);
    assert!(out.frames.is_empty());
    assert!(out.events.is_empty());
}

#[test]
fn test_router_starts_pairing_on_encryption_request() {
    let mut router = router();
    let mut out = output();

    router.att_mut().read(0x0003, &mut out);
    router.settle(&mut out);
    assert_eq!(out.frames.len(), 1);

    // Insufficient authentication on the read
    let mut out = output();
    router.handle_frame(
        L2CAP_ATTRIBUTE_PROTOCOL_CID,
        &[0x01, 0x0A, 0x03, 0x00, 0x05],
        &mut out,
    );

    assert_eq!(out.frames.len(), 1);
    assert_eq!(out.frames[0].channel_id, L2CAP_SECURITY_MANAGER_CID);
    assert_eq!(
        out.frames[0].payload,
        vec![0x01, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01]
    );
    assert!(out.events.is_empty());
    assert!(router.smp().in_progress());

    // A second request while pairing does not restart it
    let mut out = output();
    out.request_encryption();
    router.settle(&mut out);
    assert!(out.frames.is_empty());
}

#[test]
fn test_router_encryption_failure_fails_waiting_request() {
    let mut router = router();
    let mut out = output();
    router.att_mut().read(0x0003, &mut out);
    router.handle_frame(
        L2CAP_ATTRIBUTE_PROTOCOL_CID,
        &[0x01, 0x0A, 0x03, 0x00, 0x0F],
        &mut out,
    );

    // Peer refuses to pair
    let mut out = output();
    router.handle_frame(L2CAP_SECURITY_MANAGER_CID, &[0x05, 0x05], &mut out);

    let completed = out.events.iter().find_map(|event| match event {
        LinkEvent::Gatt(GattEvent::Completed {
            operation, result, ..
        }) => Some((*operation, result.is_err())),
        _ => None,
    });
    assert_eq!(completed, Some((Operation::Read, true)));
}

#[test]
fn test_router_encryption_change_resumes_request() {
    let mut router = router();
    let mut out = output();
    router.att_mut().read(0x0003, &mut out);
    router.handle_frame(
        L2CAP_ATTRIBUTE_PROTOCOL_CID,
        &[0x01, 0x0A, 0x03, 0x00, 0x05],
        &mut out,
    );

    let mut out = output();
    router.on_encryption_change(true, 0x00, &mut out);
    assert_eq!(out.frames.len(), 1);
    assert_eq!(out.frames[0].payload, vec![0x0A, 0x03, 0x00]);

    let mut out = output();
    router.handle_frame(L2CAP_ATTRIBUTE_PROTOCOL_CID, &[0x0B, 0x42], &mut out);
    assert!(matches!(
        out.events.as_slice(),
        [LinkEvent::Gatt(GattEvent::Completed { result: Ok(Outcome::Value(v)), .. })] if v == &vec![0x42]
    ));
}

#[test]
fn test_signaling_messages_survive_serialize_and_parse() {
    let messages = [
        SignalingMessage::CommandReject {
            identifier: 0x01,
            reason: 0x0002,
            data: vec![0x40, 0x00, 0x41, 0x00],
        },
        SignalingMessage::ConnectionParameterUpdateRequest {
            identifier: 0x02,
            parameters: ConnectionParameters {
                interval_min: 0x0006,
                interval_max: 0x0C80,
                latency: 0x01F3,
                supervision_timeout: 0x0C80,
            },
        },
        SignalingMessage::ConnectionParameterUpdateResponse {
            identifier: 0x03,
            result: 0x0001,
        },
        SignalingMessage::Other {
            code: L2CAP_LE_CREDIT_BASED_CONNECTION_REQUEST,
            identifier: 0x04,
            data: vec![0x80, 0x00, 0x40, 0x00, 0x17, 0x00, 0x17, 0x00, 0x0A, 0x00],
        },
    ];

    for message in messages {
        let bytes = message.serialize();
        assert_eq!(SignalingMessage::parse(&bytes).unwrap(), message, "{:02x?}", bytes);
    }
}
