//! Recovery-code generation and hashing
//!
//! Recovery codes are never stored in plaintext. The stored value is a SHA-256
//! digest of the code bound to the code's own record id, and verification uses
//! constant-time comparison via the `subtle` crate.
//!
//! A 4-digit code has a tiny keyspace; the per-code attempt cap is what keeps
//! guessing infeasible, so the hash only protects against casual disclosure of
//! the table contents.

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Smallest and largest recovery code, both inclusive.
pub const RECOVERY_CODE_MIN: u32 = 1000;
pub const RECOVERY_CODE_MAX: u32 = 9999;

/// Generate a 4-digit numeric recovery code.
pub fn generate_recovery_code() -> String {
    rand::rng()
        .random_range(RECOVERY_CODE_MIN..=RECOVERY_CODE_MAX)
        .to_string()
}

/// Hash a recovery code for storage.
///
/// The code id acts as a per-record salt so equal codes issued to different
/// identities produce different digests.
pub fn hash_code(code_id: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a supplied code against a stored digest in constant time.
pub fn verify_code_hash(code_id: &str, code: &str, stored_hash: &str) -> bool {
    let computed_hash = hash_code(code_id, code);
    constant_time_compare(computed_hash.as_bytes(), stored_hash.as_bytes())
}

/// Constant-time comparison of two byte slices.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_four_digits() {
        for _ in 0..200 {
            let code = generate_recovery_code();
            assert_eq!(code.len(), 4);
            let value: u32 = code.parse().unwrap();
            assert!((RECOVERY_CODE_MIN..=RECOVERY_CODE_MAX).contains(&value));
        }
    }

    #[test]
    fn test_hash_and_verify_code() {
        let hash = hash_code("rc_1", "4821");

        assert!(verify_code_hash("rc_1", "4821", &hash));
        assert!(verify_code_hash("rc_1", " 4821 ", &hash));
        assert!(!verify_code_hash("rc_1", "0000", &hash));
        assert!(!verify_code_hash("rc_2", "4821", &hash));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = hash_code("rc_1", "1234");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"hello", b"hello"));
        assert!(!constant_time_compare(b"hello", b"world"));
        assert!(!constant_time_compare(b"short", b"longer_string"));
    }
}
