//! Client-token format: `<prefix>.<secret>`.
//!
//! Prefix and secret are independent random strings; the prefix is the
//! public lookup half, the secret is shown once and only its SHA-256
//! digest is stored.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::hash::sha256_hex;

const PREFIX_LEN: usize = 12;
const SECRET_LEN: usize = 32;

/// A freshly minted client token. `token` is the only place the secret
/// half ever appears in plaintext.
pub struct IssuedToken {
    pub token: String,
    pub prefix: String,
    pub secret_hash: String,
}

/// Mint a new client token.
pub fn generate_client_token() -> IssuedToken {
    let prefix = random_string(PREFIX_LEN);
    let secret = random_string(SECRET_LEN);
    IssuedToken {
        token: format!("{prefix}.{secret}"),
        secret_hash: sha256_hex(secret.as_bytes()),
        prefix,
    }
}

/// Split a presented token into `(prefix, secret)`. Returns `None` when
/// either half is empty or the separator is missing.
pub fn split_token(token: &str) -> Option<(&str, &str)> {
    let (prefix, secret) = token.split_once('.')?;
    if prefix.is_empty() || secret.is_empty() {
        return None;
    }
    Some((prefix, secret))
}

/// Display-safe fragment of an upstream secret: first and last four
/// characters with the middle elided.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 8 {
        return "••••".into();
    }
    let head: String = secret.chars().take(4).collect();
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{head}…{tail}")
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_splits_back() {
        let issued = generate_client_token();
        let (prefix, secret) = split_token(&issued.token).unwrap();
        assert_eq!(prefix, issued.prefix);
        assert_eq!(sha256_hex(secret.as_bytes()), issued.secret_hash);
    }

    #[test]
    fn issued_tokens_are_unique() {
        let a = generate_client_token();
        let b = generate_client_token();
        assert_ne!(a.token, b.token);
        assert_ne!(a.prefix, b.prefix);
    }

    #[test]
    fn split_rejects_malformed_tokens() {
        assert!(split_token("no-separator").is_none());
        assert!(split_token(".secretonly").is_none());
        assert!(split_token("prefixonly.").is_none());
        assert!(split_token("").is_none());
    }

    #[test]
    fn split_keeps_dots_in_secret() {
        let (prefix, secret) = split_token("abc.def.ghi").unwrap();
        assert_eq!(prefix, "abc");
        assert_eq!(secret, "def.ghi");
    }

    #[test]
    fn mask_hides_middle() {
        let masked = mask_secret("tvly-dev-0123456789");
        assert_eq!(masked, "tvly…6789");
        assert!(!masked.contains("0123"));
    }

    #[test]
    fn mask_short_secret_entirely() {
        assert_eq!(mask_secret("short"), "••••");
        assert_eq!(mask_secret(""), "••••");
    }
}
