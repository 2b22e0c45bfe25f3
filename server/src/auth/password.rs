//! PBKDF2-HMAC-SHA256 password hashing, stored as `pbkdf2$<iter>$<salt_hex>$<hash_hex>`.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const DEFAULT_ITERATIONS: u32 = 100_000;
const HASH_LEN: usize = 32;
const SALT_LEN: usize = 16;

pub fn hash_password(password: &str) -> String {
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_password_with(password, &salt, DEFAULT_ITERATIONS)
}

fn hash_password_with(password: &str, salt: &[u8], iterations: u32) -> String {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    format!(
        "pbkdf2${}${}${}",
        iterations,
        hex::encode(salt),
        hex::encode(out)
    )
}

/// Verifies `password` against a stored `pbkdf2$<iter>$<salt_hex>$<hash_hex>` hash.
/// Malformed hashes are treated as a non-match rather than a panic.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let mut parts = stored_hash.splitn(4, '$');
    let scheme = parts.next();
    let iterations = parts.next().and_then(|s| s.parse::<u32>().ok());
    let salt = parts.next().and_then(|s| hex::decode(s).ok());
    let expected = parts.next().and_then(|s| hex::decode(s).ok());

    let (Some("pbkdf2"), Some(iterations), Some(salt), Some(expected)) =
        (scheme, iterations, salt, expected)
    else {
        return false;
    };

    let mut actual = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut actual);
    actual.len() == expected.len() && actual.ct_eq(&expected).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let hash = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn malformed_hash_never_matches() {
        assert!(!verify_password("anything", "not-a-valid-hash"));
    }

    #[test]
    fn two_hashes_of_same_password_differ_by_salt() {
        let a = hash_password("hunter2");
        let b = hash_password("hunter2");
        assert_ne!(a, b);
        assert!(verify_password("hunter2", &a));
        assert!(verify_password("hunter2", &b));
    }
}
