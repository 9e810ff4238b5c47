//! Tests for Security Manager pairing

use super::constants::*;
use super::crypto::*;
use super::engine::SmpPairingEngine;
use super::pairing::*;
use super::types::*;
use crate::config::SmpConfig;
use crate::l2cap::router::{LinkEvent, LinkOutput};
use std::time::Instant;

fn output() -> LinkOutput {
    LinkOutput::new(Instant::now())
}

fn le6(value: u64) -> [u8; 6] {
    let mut out = [0u8; 6];
    out.copy_from_slice(&value.to_le_bytes()[..6]);
    out
}

fn le7(value: u64) -> [u8; 7] {
    let mut out = [0u8; 7];
    out.copy_from_slice(&value.to_le_bytes()[..7]);
    out
}

fn addresses() -> PairingAddresses {
    PairingAddresses {
        initiator_type: 1,
        initiator: le6(0xA1A2A3A4A5A6),
        responder_type: 0,
        responder: le6(0xB1B2B3B4B5B6),
    }
}

/// Pairing Response for Just Works with EncKey distribution
const PAIRING_RESPONSE: [u8; 7] = [0x02, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01];

fn smp_payloads(out: &LinkOutput) -> Vec<Vec<u8>> {
    out.frames
        .iter()
        .inspect(|frame| assert_eq!(frame.channel_id, SMP_CID))
        .map(|frame| frame.payload.clone())
        .collect()
}

#[test]
fn test_c1_sample_data() {
    let k = [0u8; 16];
    let r = 0x5783D52156AD6F0E6388274EC6702EE0u128.to_le_bytes();
    let pres = le7(0x05000800000302);
    let preq = le7(0x07071000000101);
    let ia = le6(0xA1A2A3A4A5A6);
    let ra = le6(0xB1B2B3B4B5B6);

    let confirm = c1(&k, &r, &preq, &pres, 1, &ia, 0, &ra);
    assert_eq!(confirm, 0x1e1e3fef878988ead2a74dc5bef13b86u128.to_le_bytes());
}

#[test]
fn test_s1_sample_data() {
    let k = [0u8; 16];
    let r1 = 0x000F0E0D0C0B0A091122334455667788u128.to_le_bytes();
    let r2 = 0x010203040506070899AABBCCDDEEFF00u128.to_le_bytes();

    assert_eq!(
        s1(&k, &r1, &r2),
        0x9a1fe1f0e8b0f49b5b4216ae796da062u128.to_le_bytes()
    );
}

#[test]
fn test_pairing_request_layout() {
    let config = SmpConfig::default();
    let request = PairingRequest {
        io_capability: config.io_capability.to_u8(),
        oob_data_present: 0,
        auth_req: config.auth_req,
        max_key_size: config.max_key_size,
        initiator_key_dist: config.initiator_key_dist,
        responder_key_dist: config.responder_key_dist,
    };
    assert_eq!(
        request.serialize(true),
        [0x01, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01]
    );
    assert_eq!(PairingRequest::parse(&PAIRING_RESPONSE).unwrap().max_key_size, 16);
}

#[test]
fn test_parse_distributed_keys() {
    let mut data = vec![SMP_ENCRYPTION_INFORMATION];
    data.extend(0u8..16);
    assert!(matches!(
        SmpPdu::parse(&data).unwrap(),
        SmpPdu::EncryptionInformation(info) if info.long_term_key[15] == 15
    ));

    let data = [SMP_MASTER_IDENTIFICATION, 0x34, 0x12, 1, 2, 3, 4, 5, 6, 7, 8];
    assert_eq!(
        SmpPdu::parse(&data).unwrap(),
        SmpPdu::MasterIdentification(MasterIdentification {
            ediv: 0x1234,
            rand: [1, 2, 3, 4, 5, 6, 7, 8],
        })
    );

    assert!(SmpPdu::parse(&[SMP_PAIRING_CONFIRM, 0x00]).is_err());
    assert!(SmpPdu::parse(&[]).is_err());
}

#[test]
fn test_failure_reason_codes() {
    assert_eq!(FailureReason::from(0x04), FailureReason::ConfirmValueFailed);
    assert_eq!(FailureReason::from(0x33), FailureReason::Other(0x33));
    assert_eq!(u8::from(FailureReason::PairingNotSupported), 0x05);
}

/// Drive a full pairing playing the responder. Returns the STK the engine
/// reported and the one the responder computes.
fn run_pairing(corrupt_random: bool) -> (LinkOutput, Option<[u8; 16]>) {
    let a = addresses();
    let mut engine = SmpPairingEngine::new(SmpConfig::default(), a);
    let mut out = output();

    engine.start_pairing(&mut out).unwrap();
    let preq: [u8; 7] = smp_payloads(&out)[0].as_slice().try_into().unwrap();
    assert_eq!(engine.state(), PairingState::RequestSent);

    // Responder answers; the engine sends its confirm
    let mut out = output();
    engine.handle_pdu(&PAIRING_RESPONSE, &mut out);
    assert_eq!(engine.state(), PairingState::ConfirmSent);
    let initiator_confirm = smp_payloads(&out)[0].clone();
    assert_eq!(initiator_confirm[0], SMP_PAIRING_CONFIRM);

    let srand = [0x5Au8; 16];
    let tk = [0u8; 16];
    let responder_confirm = c1(
        &tk,
        &srand,
        &preq,
        &PAIRING_RESPONSE,
        a.initiator_type,
        &a.initiator,
        a.responder_type,
        &a.responder,
    );
    let mut out = output();
    engine.handle_pdu(
        &PairingConfirm {
            confirm_value: responder_confirm,
        }
        .serialize(),
        &mut out,
    );
    let mrand_pdu = smp_payloads(&out)[0].clone();
    assert_eq!(mrand_pdu[0], SMP_PAIRING_RANDOM);
    let mut mrand = [0u8; 16];
    mrand.copy_from_slice(&mrand_pdu[1..17]);

    // The initiator's confirm must match the random it revealed
    let expected = c1(
        &tk,
        &mrand,
        &preq,
        &PAIRING_RESPONSE,
        a.initiator_type,
        &a.initiator,
        a.responder_type,
        &a.responder,
    );
    assert_eq!(&initiator_confirm[1..], &expected);

    let mut sent_random = srand;
    if corrupt_random {
        sent_random[0] ^= 0xFF;
    }
    let mut out = output();
    engine.handle_pdu(
        &PairingRandom {
            random_value: sent_random,
        }
        .serialize(),
        &mut out,
    );

    let stk = (!corrupt_random).then(|| s1(&tk, &srand, &mrand));
    (out, stk)
}

#[test]
fn test_just_works_pairing_produces_stk() {
    let (out, stk) = run_pairing(false);
    let stk = stk.unwrap();

    assert!(out.frames.is_empty());
    assert!(matches!(
        out.events.as_slice(),
        [LinkEvent::Smp(SmpEvent::Stk(key))] if *key == stk
    ));
}

#[test]
fn test_confirm_mismatch_fails_pairing() {
    let (out, _) = run_pairing(true);

    assert_eq!(smp_payloads(&out), vec![vec![SMP_PAIRING_FAILED, 0x04]]);
    assert!(matches!(
        out.events.as_slice(),
        [LinkEvent::Smp(SmpEvent::Failed(SmpError::ConfirmValueFailed))]
    ));
}

#[test]
fn test_peer_failure_and_out_of_order_pdus() {
    let mut engine = SmpPairingEngine::new(SmpConfig::default(), addresses());
    let mut out = output();

    // Random before anything was started is dropped
    engine.handle_pdu(
        &PairingRandom {
            random_value: [0; 16],
        }
        .serialize(),
        &mut out,
    );
    assert!(out.frames.is_empty() && out.events.is_empty());

    engine.start_pairing(&mut out).unwrap();
    assert_eq!(engine.start_pairing(&mut out), Err(SmpError::PairingInProgress));

    let mut out = output();
    engine.handle_pdu(&[SMP_PAIRING_FAILED, 0x05], &mut out);
    assert_eq!(engine.state(), PairingState::Failed);
    assert!(matches!(
        out.events.as_slice(),
        [LinkEvent::Smp(SmpEvent::Failed(SmpError::PairingFailed(
            FailureReason::PairingNotSupported
        )))]
    ));
}

#[test]
fn test_security_request_starts_pairing() {
    let mut engine = SmpPairingEngine::new(SmpConfig::default(), addresses());
    let mut out = output();

    engine.handle_pdu(&[SMP_SECURITY_REQUEST, 0x01], &mut out);

    assert_eq!(engine.state(), PairingState::RequestSent);
    assert_eq!(smp_payloads(&out)[0][0], SMP_PAIRING_REQUEST);
}

#[test]
fn test_distributed_keys_are_reported() {
    let mut engine = SmpPairingEngine::new(SmpConfig::default(), addresses());
    let mut out = output();

    let ltk = [0xA5u8; 16];
    engine.handle_pdu(&EncryptionInformation { long_term_key: ltk }.serialize(), &mut out);
    engine.handle_pdu(
        &MasterIdentification {
            ediv: 0xBEEF,
            rand: [9; 8],
        }
        .serialize(),
        &mut out,
    );

    assert!(matches!(
        out.events.as_slice(),
        [
            LinkEvent::Smp(SmpEvent::Ltk(key)),
            LinkEvent::Smp(SmpEvent::MasterIdentification { ediv: 0xBEEF, .. }),
        ] if *key == ltk
    ));
}

#[test]
fn test_small_key_size_is_rejected() {
    let mut engine = SmpPairingEngine::new(SmpConfig::default(), addresses());
    let mut out = output();
    engine.start_pairing(&mut out).unwrap();

    let mut out = output();
    engine.handle_pdu(&[0x02, 0x03, 0x00, 0x01, 0x06, 0x00, 0x01], &mut out);

    assert_eq!(smp_payloads(&out), vec![vec![SMP_PAIRING_FAILED, 0x06]]);
    assert_eq!(engine.state(), PairingState::Failed);
}

#[test]
fn test_pdus_survive_serialize_and_parse() {
    let request = PairingRequest {
        io_capability: 0x04,
        oob_data_present: 0x01,
        auth_req: AuthRequirements::BONDING | AuthRequirements::MITM,
        max_key_size: 7,
        initiator_key_dist: KeyDistribution::ENC_KEY | KeyDistribution::ID_KEY,
        responder_key_dist: KeyDistribution::SIGN_KEY,
    };
    let fixtures = [
        (request.serialize(true).to_vec(), SmpPdu::PairingRequest(request)),
        (request.serialize(false).to_vec(), SmpPdu::PairingResponse(request)),
        (
            PairingConfirm { confirm_value: [0x11; 16] }.serialize(),
            SmpPdu::PairingConfirm(PairingConfirm { confirm_value: [0x11; 16] }),
        ),
        (
            PairingRandom { random_value: [0x22; 16] }.serialize(),
            SmpPdu::PairingRandom(PairingRandom { random_value: [0x22; 16] }),
        ),
        (
            PairingFailed { reason: FailureReason::UnspecifiedReason }.serialize(),
            SmpPdu::PairingFailed(PairingFailed { reason: FailureReason::UnspecifiedReason }),
        ),
        (
            EncryptionInformation { long_term_key: [0x33; 16] }.serialize(),
            SmpPdu::EncryptionInformation(EncryptionInformation { long_term_key: [0x33; 16] }),
        ),
        (
            MasterIdentification { ediv: 0x0102, rand: [0x44; 8] }.serialize(),
            SmpPdu::MasterIdentification(MasterIdentification { ediv: 0x0102, rand: [0x44; 8] }),
        ),
        (
            SecurityRequest { auth_req: AuthRequirements::BONDING }.serialize(),
            SmpPdu::SecurityRequest(SecurityRequest { auth_req: AuthRequirements::BONDING }),
        ),
    ];

    for (bytes, pdu) in fixtures {
        assert_eq!(SmpPdu::parse(&bytes).unwrap(), pdu, "{:02x?}", bytes);
    }
}

#[test]
fn test_pairing_stays_in_progress_until_encryption_starts() {
    let mut engine = SmpPairingEngine::new(SmpConfig::default(), addresses());
    let mut out = output();
    engine.start_pairing(&mut out).unwrap();
    engine.handle_pdu(&PAIRING_RESPONSE, &mut out);
    let preq: [u8; 7] = smp_payloads(&out)[0].as_slice().try_into().unwrap();

    let srand = [0x5Au8; 16];
    let a = addresses();
    let confirm = c1(
        &[0u8; 16],
        &srand,
        &preq,
        &PAIRING_RESPONSE,
        a.initiator_type,
        &a.initiator,
        a.responder_type,
        &a.responder,
    );
    engine.handle_pdu(&PairingConfirm { confirm_value: confirm }.serialize(), &mut out);
    engine.handle_pdu(&PairingRandom { random_value: srand }.serialize(), &mut out);
    assert_eq!(engine.state(), PairingState::StkReady);
    assert!(engine.in_progress());

    let mut out = output();
    assert_eq!(engine.start_pairing(&mut out), Err(SmpError::PairingInProgress));
    assert!(out.frames.is_empty());

    engine.on_encryption_change(true);
    assert_eq!(engine.state(), PairingState::Idle);
    assert!(!engine.in_progress());

    // Encryption outside a pairing leaves the state alone
    engine.on_encryption_change(false);
    assert_eq!(engine.state(), PairingState::Idle);
}
