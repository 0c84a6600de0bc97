//! Digest helpers shared by token auth and usage logging.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 digest of arbitrary bytes.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex-encoded HMAC-SHA256, used to hash logged queries under a server key.
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    // Per RFC 2104 any key length is accepted; new_from_slice cannot fail
    // for Hmac, so fall back to an empty-key digest rather than panicking.
    let mut mac = match Hmac::<Sha256>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => Hmac::<Sha256>::new(&Default::default()),
    };
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time byte comparison. Returns `false` for mismatched lengths
/// without inspecting contents.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_differs_by_key() {
        let a = hmac_sha256_hex(b"key-one", b"rust async runtime");
        let b = hmac_sha256_hex(b"key-two", b"rust async runtime");
        assert_ne!(a, b);
        assert_eq!(a, hmac_sha256_hex(b"key-one", b"rust async runtime"));
    }

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"diff"));
        assert!(!constant_time_eq(b"short", b"longer input"));
    }
}
