//! Prefixed identifier generation
//!
//! Identifiers look like `{prefix}_{random}`, similar to Stripe's API. The
//! random part is at least 96 bits of entropy, URL-safe base64 without padding.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::RngCore;

pub const SUBJECT_PREFIX: &str = "sub";
pub const SESSION_PREFIX: &str = "ses";
pub const TOKEN_PREFIX: &str = "tok";
pub const RECOVERY_CODE_PREFIX: &str = "rc";

const MIN_ENTROPY_BYTES: usize = 12;

/// Generate a prefixed ID with 96 bits of entropy
///
/// # Example
/// ```
/// use portcullis_core::id::generate_prefixed_id;
///
/// let id = generate_prefixed_id("ses");
/// assert!(id.starts_with("ses_"));
/// ```
pub fn generate_prefixed_id(prefix: &str) -> String {
    generate_prefixed_id_with_bytes(prefix, MIN_ENTROPY_BYTES)
}

/// Generate a prefixed ID with `bytes` random bytes, clamped to at least 12.
pub fn generate_prefixed_id_with_bytes(prefix: &str, bytes: usize) -> String {
    let mut random_bytes = vec![0u8; bytes.max(MIN_ENTROPY_BYTES)];
    rand::rng().fill_bytes(&mut random_bytes);

    let encoded = BASE64_URL_SAFE_NO_PAD.encode(random_bytes);

    format!("{prefix}_{encoded}")
}

/// Validate that a prefixed ID has the expected prefix and enough entropy
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    let Some(random_part) = id
        .strip_prefix(expected_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    match BASE64_URL_SAFE_NO_PAD.decode(random_part) {
        Ok(decoded) => decoded.len() >= MIN_ENTROPY_BYTES,
        Err(_) => false,
    }
}
