// src/ledger/block.rs
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use signature::{Signer, Verifier};

use super::canonical::canonicalize;
use crate::crypto::sha256_hex;

/// Fixed genesis instant (2024-01-01T00:00:00Z) so every node derives the same block 0.
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200_000;
pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    /// Unix millis.
    pub timestamp: i64,
    pub data: Value,
    pub previous_hash: String,
    #[serde(default)]
    pub validator_id: Option<String>,
    pub hash: String,
    pub merkle_root: String,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_signature: Option<String>,
}

impl Block {
    /// Build and seal a block: merkle root first, then the hash that covers it.
    pub fn new(
        index: u64,
        timestamp: i64,
        data: Value,
        previous_hash: impl Into<String>,
        validator_id: Option<String>,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            data,
            previous_hash: previous_hash.into(),
            validator_id,
            hash: String::new(),
            merkle_root: String::new(),
            nonce: 0,
            validator_signature: None,
        };
        block.merkle_root = block.calculate_merkle_root();
        block.hash = block.calculate_hash();
        block
    }

    pub fn genesis() -> Self {
        Self::new(
            0,
            GENESIS_TIMESTAMP,
            json!({
                "message": "Genesis Block - agricultural ledger initialized",
                "type": "GENESIS",
                "version": "1.0.0"
            }),
            GENESIS_PREVIOUS_HASH,
            None,
        )
    }

    pub fn calculate_hash(&self) -> String {
        sha256_hex(format!(
            "{}{}{}{}{}{}",
            self.index,
            self.previous_hash,
            self.timestamp,
            canonicalize(&self.data),
            self.nonce,
            self.merkle_root
        ))
    }

    pub fn calculate_merkle_root(&self) -> String {
        sha256_hex(canonicalize(&self.data))
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn has_valid_merkle_root(&self) -> bool {
        self.merkle_root == self.calculate_merkle_root()
    }

    /// Sign `hash` with the validator key, storing the hex signature on the block.
    pub fn sign(&mut self, key: &SigningKey) {
        let sig: Signature = key.sign(self.hash.as_bytes());
        self.validator_signature = Some(hex::encode(sig.to_bytes()));
    }

    /// False when unsigned or when the signature does not cover the current hash.
    pub fn verify_signature(&self, key: &VerifyingKey) -> bool {
        let Some(sig_hex) = self.validator_signature.as_deref() else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(sig_hex) else {
            return false;
        };
        let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        key.verify(self.hash.as_bytes(), &Signature::from_bytes(&sig_array))
            .is_ok()
    }

    /// String field of the payload, if present.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a, b);
        assert_eq!(a.previous_hash, "0");
        assert!(a.has_valid_hash());
        assert!(a.has_valid_merkle_root());
    }

    #[test]
    fn hash_covers_every_field() {
        let block = Block::new(1, 1_000, json!({"transactionId": "t"}), "abc", None);
        let mut moved = block.clone();
        moved.timestamp += 1;
        assert!(!moved.has_valid_hash());

        let mut relinked = block.clone();
        relinked.previous_hash = "abd".into();
        assert!(!relinked.has_valid_hash());

        let mut edited = block;
        edited.data = json!({"transactionId": "u"});
        assert!(!edited.has_valid_merkle_root());
    }

    #[test]
    fn signature_round_trip() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let mut block = Block::new(1, 1_000, json!({"contractId": "c"}), "abc", None);
        assert!(!block.verify_signature(&key.verifying_key()));
        block.sign(&key);
        assert!(block.verify_signature(&key.verifying_key()));

        let other = SigningKey::from_bytes(&[4u8; 32]);
        assert!(!block.verify_signature(&other.verifying_key()));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let v = serde_json::to_value(Block::genesis()).unwrap();
        assert!(v.get("previousHash").is_some());
        assert!(v.get("merkleRoot").is_some());
        assert!(v.get("validatorSignature").is_none());
    }
}
