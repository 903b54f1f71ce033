pub mod keys;

use sha2::{Digest, Sha256};

/// Lowercase hex sha256 of `bytes`.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    hex::encode(hasher.finalize())
}

/// Verify ed25519 signature where public key and signature are hex strings.
/// Returns false on malformed hex or wrong lengths.
pub fn verify_ed25519_hex(pubkey_hex: &str, sig_hex: &str, message: &[u8]) -> bool {
    let pk_bytes = match hex::decode(pubkey_hex.trim()) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let sig_bytes = match hex::decode(sig_hex.trim()) {
        Ok(b) => b,
        Err(_) => return false,
    };
    keys::verify_bytes(&pk_bytes, message, &sig_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hex_verification_rejects_garbage() {
        assert!(!verify_ed25519_hex("zz", "00", b"msg"));
        assert!(!verify_ed25519_hex(&"00".repeat(32), &"00".repeat(10), b"msg"));
    }
}
