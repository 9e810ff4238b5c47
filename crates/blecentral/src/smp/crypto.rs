//! Cryptographic functions for LE legacy pairing
//!
//! All values are byte arrays in the order they travel over the air, which is
//! least significant octet first. AES works on most significant octet first,
//! so `e` reverses on the way in and out.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

fn reversed(value: &[u8; 16]) -> [u8; 16] {
    let mut out = *value;
    out.reverse();
    out
}

fn xor(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    core::array::from_fn(|i| a[i] ^ b[i])
}

/// Security function e: AES-128 of `plaintext` under `key`
pub fn e(key: &[u8; 16], plaintext: &[u8; 16]) -> [u8; 16] {
    let key = reversed(key);
    let cipher = Aes128::new(GenericArray::from_slice(&key));

    let mut block = reversed(plaintext);
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
    reversed(&block)
}

/// Generate a 128-bit random number
pub fn generate_random_128() -> [u8; 16] {
    rand::random()
}

/// Confirm value generation function c1.
///
/// `preq` and `pres` are the Pairing Request and Pairing Response PDUs as
/// sent, command code included.
#[allow(clippy::too_many_arguments)]
pub fn c1(
    k: &[u8; 16],
    r: &[u8; 16],
    preq: &[u8; 7],
    pres: &[u8; 7],
    initiator_type: u8,
    initiator: &[u8; 6],
    responder_type: u8,
    responder: &[u8; 6],
) -> [u8; 16] {
    // p1 = pres || preq || rat || iat
    let mut p1 = [0u8; 16];
    p1[0] = initiator_type;
    p1[1] = responder_type;
    p1[2..9].copy_from_slice(preq);
    p1[9..16].copy_from_slice(pres);

    // p2 = padding || ia || ra
    let mut p2 = [0u8; 16];
    p2[0..6].copy_from_slice(responder);
    p2[6..12].copy_from_slice(initiator);

    let step = e(k, &xor(r, &p1));
    e(k, &xor(&step, &p2))
}

/// Key generation function s1: r' is the low half of r1 above the low half
/// of r2.
pub fn s1(k: &[u8; 16], r1: &[u8; 16], r2: &[u8; 16]) -> [u8; 16] {
    let mut r_prime = [0u8; 16];
    r_prime[0..8].copy_from_slice(&r2[0..8]);
    r_prime[8..16].copy_from_slice(&r1[0..8]);
    e(k, &r_prime)
}
