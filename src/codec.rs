//! Personal access token codec.
//!
//! Secrets look like `pat_<64 lowercase hex chars>`. Only two derived values
//! are ever persisted: the lookup prefix (first 12 chars, not secret) and the
//! SHA-256 digest of the whole rendered secret.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Tag every rendered secret starts with.
pub const TOKEN_TAG: &str = "pat_";

/// Random bytes behind the tag.
pub const SECRET_BYTES: usize = 32;

/// Rendered secret length: tag + hex body.
pub const SECRET_LEN: usize = TOKEN_TAG.len() + SECRET_BYTES * 2;

/// Stored/displayed lookup prefix length: tag + 8 hex chars.
pub const PREFIX_LEN: usize = TOKEN_TAG.len() + 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed credential")]
    Malformed,
}

/// Freshly generated credential. The secret is wiped from memory on drop.
pub struct GeneratedToken {
    pub secret: Zeroizing<String>,
    pub prefix: String,
    pub digest: String,
}

impl std::fmt::Debug for GeneratedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedToken")
            .field("prefix", &self.prefix)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Generate a new secret with its prefix and digest.
pub fn generate() -> GeneratedToken {
    let mut raw = Zeroizing::new([0u8; SECRET_BYTES]);
    OsRng.fill_bytes(&mut raw[..]);

    let mut secret = Zeroizing::new(String::with_capacity(SECRET_LEN));
    secret.push_str(TOKEN_TAG);
    secret.push_str(&hex::encode(&raw[..]));

    let prefix = secret[..PREFIX_LEN].to_string();
    let digest = hash(&secret);

    GeneratedToken {
        secret,
        prefix,
        digest,
    }
}

/// Reject anything that cannot be a rendered secret. Runs before any hashing.
pub fn check_format(secret: &str) -> Result<(), CodecError> {
    let body = secret.strip_prefix(TOKEN_TAG).ok_or(CodecError::Malformed)?;
    if secret.len() != SECRET_LEN {
        return Err(CodecError::Malformed);
    }
    if !body.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(CodecError::Malformed);
    }
    Ok(())
}

/// Lookup prefix of a well-formed secret.
pub fn prefix_of(secret: &str) -> Result<&str, CodecError> {
    check_format(secret)?;
    Ok(&secret[..PREFIX_LEN])
}

/// Digest of a well-formed secret.
pub fn digest(secret: &str) -> Result<String, CodecError> {
    check_format(secret)?;
    Ok(hash(secret))
}

/// Constant-time comparison of `secret`'s digest against a stored digest.
/// Malformed input is rejected without hashing.
pub fn verify(secret: &str, stored_digest: &str) -> bool {
    if check_format(secret).is_err() {
        return false;
    }
    let computed = hash(secret);
    computed.as_bytes().ct_eq(stored_digest.as_bytes()).into()
}

fn hash(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
