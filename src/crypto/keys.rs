// src/crypto/keys.rs
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use signature::{Signer, Verifier};

use crate::ledger::canonical::canonicalize;

/// Payload fields excluded from the signed message.
pub const SIGNATURE_FIELD: &str = "signature";
pub const SENDER_KEY_FIELD: &str = "senderPublicKey";

/// Verify a signature over `msg` using `pubkey` (32 bytes) and signature bytes.
/// Returns `true` if signature verifies.
pub fn verify_bytes(pubkey: &[u8], msg: &[u8], sig_bytes: &[u8]) -> bool {
    let vk = match <&[u8; 32]>::try_from(pubkey) {
        Ok(pubkey_array) => match VerifyingKey::from_bytes(pubkey_array) {
            Ok(v) => v,
            Err(_) => return false,
        },
        Err(_) => return false,
    };

    let sig = match <&[u8; 64]>::try_from(sig_bytes) {
        Ok(sig_array) => Signature::from_bytes(sig_array),
        Err(_) => return false,
    };

    vk.verify(msg, &sig).is_ok()
}

/// Sign `msg` with the 32-byte secret seed (raw bytes). Returns signature bytes.
/// Returns None for invalid seed length.
pub fn sign_bytes(secret_seed: &[u8], msg: &[u8]) -> Option<Vec<u8>> {
    let sk = signing_key_from_seed(secret_seed)?;
    let sig: Signature = sk.sign(msg);
    Some(sig.to_bytes().to_vec())
}

/// Derive verifying (public) key bytes from a 32-byte seed.
pub fn public_from_seed(seed: &[u8]) -> Option<Vec<u8>> {
    let sk = signing_key_from_seed(seed)?;
    Some(VerifyingKey::from(&sk).to_bytes().to_vec())
}

pub fn signing_key_from_seed(seed: &[u8]) -> Option<SigningKey> {
    let seed_array = <&[u8; 32]>::try_from(seed).ok()?;
    Some(SigningKey::from_bytes(seed_array))
}

/// Parse a hex encoded 32-byte seed into a signing key.
pub fn signing_key_from_hex(seed_hex: &str) -> Option<SigningKey> {
    let bytes = hex::decode(seed_hex.trim()).ok()?;
    signing_key_from_seed(&bytes)
}

pub fn verifying_key_from_hex(pubkey_hex: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(pubkey_hex.trim()).ok()?;
    let arr = <&[u8; 32]>::try_from(bytes.as_slice()).ok()?;
    VerifyingKey::from_bytes(arr).ok()
}

/// Fresh random 32-byte seed from the OS RNG.
pub fn generate_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Outcome of checking the optional signature carried by a submitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSignature {
    /// Neither `signature` nor `senderPublicKey` present.
    Unsigned,
    /// Only one of the two fields present.
    Incomplete,
    Valid,
    Invalid,
}

/// Bytes a transaction signature covers: the canonical payload minus the signature fields.
pub fn payload_signing_message(payload: &Value) -> Vec<u8> {
    let mut stripped = payload.clone();
    if let Value::Object(map) = &mut stripped {
        map.remove(SIGNATURE_FIELD);
        map.remove(SENDER_KEY_FIELD);
    }
    canonicalize(&stripped).into_bytes()
}

/// Check a payload's embedded transaction signature.
pub fn verify_payload_signature(payload: &Value) -> PayloadSignature {
    let sig = payload.get(SIGNATURE_FIELD).and_then(Value::as_str);
    let key = payload.get(SENDER_KEY_FIELD).and_then(Value::as_str);
    match (sig, key) {
        (None, None) => PayloadSignature::Unsigned,
        (Some(sig), Some(key)) => {
            let msg = payload_signing_message(payload);
            if super::verify_ed25519_hex(key, sig, &msg) {
                PayloadSignature::Valid
            } else {
                PayloadSignature::Invalid
            }
        }
        _ => PayloadSignature::Incomplete,
    }
}

/// Attach `senderPublicKey` and `signature` to an object payload.
/// Non-object payloads are returned unchanged.
pub fn sign_payload(payload: &Value, key: &SigningKey) -> Value {
    let mut signed = payload.clone();
    let msg = payload_signing_message(payload);
    let sig: Signature = key.sign(&msg);
    if let Value::Object(map) = &mut signed {
        map.insert(
            SENDER_KEY_FIELD.to_string(),
            Value::String(hex::encode(key.verifying_key().to_bytes())),
        );
        map.insert(
            SIGNATURE_FIELD.to_string(),
            Value::String(hex::encode(sig.to_bytes())),
        );
    }
    signed
}
