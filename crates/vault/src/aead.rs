//! AEAD encryption of stored credentials.
//!
//! XChaCha20-Poly1305 with a fresh random 24-byte nonce per message; the
//! nonce is prepended to the ciphertext and the whole blob is base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use sg_domain::error::{Error, Result};

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Parse AEAD key material from configuration.
///
/// Accepts base64, hex, or a raw 32-byte string, in that order of
/// preference, and fails fast on anything else.
pub fn parse_key_material(secret: &str) -> Result<[u8; 32]> {
    if let Ok(bytes) = BASE64.decode(secret) {
        if let Ok(key) = <[u8; 32]>::try_from(bytes) {
            return Ok(key);
        }
    }
    if let Ok(bytes) = hex::decode(secret) {
        if let Ok(key) = <[u8; 32]>::try_from(bytes) {
            return Ok(key);
        }
    }
    if let Ok(key) = <[u8; 32]>::try_from(secret.as_bytes()) {
        return Ok(key);
    }
    Err(Error::Config(
        "encryption secret must decode to exactly 32 bytes (base64, hex, or raw)".into(),
    ))
}

/// Holds the cipher for the stored-credential vault.
pub struct Vault {
    cipher: XChaCha20Poly1305,
}

impl Vault {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(&key.into()),
        }
    }

    /// Build a vault from configured key material (see [`parse_key_material`]).
    pub fn from_secret(secret: &str) -> Result<Self> {
        Ok(Self::new(parse_key_material(secret)?))
    }

    /// Encrypt a plaintext secret. Never produces the same output twice for
    /// the same input (random nonce).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Other("AEAD encryption failed".into()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored blob. Truncation, tampering, and wrong-key all
    /// surface as the single [`Error::InvalidCiphertext`] kind.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let blob = BASE64
            .decode(encoded)
            .map_err(|_| Error::InvalidCiphertext)?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::InvalidCiphertext);
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::InvalidCiphertext)?;
        String::from_utf8(plaintext).map_err(|_| Error::InvalidCiphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        Vault::new([7u8; 32])
    }

    #[test]
    fn round_trip() {
        let v = vault();
        let ct = v.encrypt("tvly-dev-abc123").unwrap();
        assert_eq!(v.decrypt(&ct).unwrap(), "tvly-dev-abc123");
    }

    #[test]
    fn encryption_is_nondeterministic() {
        let v = vault();
        let a = v.encrypt("same input").unwrap();
        let b = v.encrypt("same input").unwrap();
        assert_ne!(a, b, "random nonce must vary the ciphertext");
    }

    #[test]
    fn truncated_blob_is_invalid_ciphertext() {
        let v = vault();
        let ct = v.encrypt("secret").unwrap();
        let blob = BASE64.decode(&ct).unwrap();
        let truncated = BASE64.encode(&blob[..NONCE_LEN + 3]);
        assert!(matches!(
            v.decrypt(&truncated),
            Err(Error::InvalidCiphertext)
        ));
    }

    #[test]
    fn tampered_blob_is_invalid_ciphertext() {
        let v = vault();
        let ct = v.encrypt("secret").unwrap();
        let mut blob = BASE64.decode(&ct).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            v.decrypt(&BASE64.encode(blob)),
            Err(Error::InvalidCiphertext)
        ));
    }

    #[test]
    fn wrong_key_is_invalid_ciphertext() {
        let ct = vault().encrypt("secret").unwrap();
        let other = Vault::new([8u8; 32]);
        assert!(matches!(other.decrypt(&ct), Err(Error::InvalidCiphertext)));
    }

    #[test]
    fn garbage_base64_is_invalid_ciphertext() {
        assert!(matches!(
            vault().decrypt("!!not base64!!"),
            Err(Error::InvalidCiphertext)
        ));
    }

    #[test]
    fn key_material_accepts_three_encodings() {
        let raw: [u8; 32] = *b"0123456789abcdef0123456789abcdef";

        let from_b64 = parse_key_material(&BASE64.encode(raw)).unwrap();
        assert_eq!(from_b64, raw);

        let from_hex = parse_key_material(&hex::encode(raw)).unwrap();
        assert_eq!(from_hex, raw);

        let from_raw =
            parse_key_material(std::str::from_utf8(&raw).unwrap()).unwrap();
        assert_eq!(from_raw, raw);
    }

    #[test]
    fn short_key_material_is_rejected() {
        assert!(matches!(
            parse_key_material("too short"),
            Err(Error::Config(_))
        ));
    }
}
