//! Crypto vault: AEAD encryption of stored upstream secrets, digest
//! helpers, and the client-token format.
//!
//! Everything secret-shaped funnels through here so the rest of the
//! workspace never touches cipher or digest primitives directly.

mod aead;
mod hash;
mod token;

pub use aead::{parse_key_material, Vault};
pub use hash::{constant_time_eq, hmac_sha256_hex, sha256, sha256_hex};
pub use token::{generate_client_token, mask_secret, split_token, IssuedToken};
