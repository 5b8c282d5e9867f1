//! Salted password hashing.
//!
//! Hashes are PBKDF2-HMAC-SHA256 encoded as
//! `pbkdf2-sha256$<iterations>$<salt-hex>$<hash-hex>`. The iteration count
//! travels with the hash, so raising the cost for new accounts never locks
//! out old ones.

use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

const SCHEME: &str = "pbkdf2-sha256";

/// Iterations used when nothing else is configured.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("failed to generate salt: {0}")]
    Salt(#[from] rand::Error),
    #[error("stored password hash is malformed")]
    Malformed,
}

/// Hashes new passwords with a fixed cost and verifies stored ones.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl PasswordHasher {
    /// Creates a hasher; an iteration count of zero is raised to one.
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    /// Hashes `password` under a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let mut salt = [0u8; SALT_BYTES];
        rand::rngs::OsRng.try_fill_bytes(&mut salt)?;
        let digest = derive(password, &salt, self.iterations);
        Ok(format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            hex::encode(salt),
            hex::encode(digest)
        ))
    }

    /// Checks `password` against an encoded hash produced by [`Self::hash`].
    ///
    /// Returns `Ok(false)` on mismatch and `Err` only when the stored value
    /// cannot be parsed.
    pub fn verify(&self, password: &str, encoded: &str) -> Result<bool, PasswordError> {
        let parsed = ParsedHash::parse(encoded).ok_or(PasswordError::Malformed)?;
        let digest = derive(password, &parsed.salt, parsed.iterations);
        Ok(constant_time_eq(&digest, &parsed.digest))
    }
}

struct ParsedHash {
    iterations: u32,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl ParsedHash {
    fn parse(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split('$');
        if parts.next()? != SCHEME {
            return None;
        }
        let iterations = parts.next()?.parse::<u32>().ok().filter(|n| *n > 0)?;
        let salt = hex::decode(parts.next()?).ok()?;
        let digest = hex::decode(parts.next()?).ok()?;
        if parts.next().is_some() || digest.len() != HASH_BYTES {
            return None;
        }
        Some(Self {
            iterations,
            salt,
            digest,
        })
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PasswordHasher {
        PasswordHasher::new(10)
    }

    #[test]
    fn verify_accepts_the_hashed_password() {
        let hasher = fast();
        let encoded = hasher.hash("hunter2").expect("hash");
        assert!(hasher.verify("hunter2", &encoded).expect("verify"));
    }

    #[test]
    fn verify_rejects_a_different_password() {
        let hasher = fast();
        let encoded = hasher.hash("hunter2").expect("hash");
        assert!(!hasher.verify("hunter3", &encoded).expect("verify"));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let hasher = fast();
        let first = hasher.hash("same").expect("hash");
        let second = hasher.hash("same").expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn verify_uses_the_stored_iteration_count() {
        let encoded = PasswordHasher::new(3).hash("pw").expect("hash");
        assert!(encoded.starts_with("pbkdf2-sha256$3$"));
        assert!(PasswordHasher::new(50).verify("pw", &encoded).expect("verify"));
    }

    #[test]
    fn malformed_hashes_are_errors() {
        let hasher = fast();
        for bad in ["", "plain", "pbkdf2-sha256$0$00$00", "bcrypt$10$aa$bb", "pbkdf2-sha256$5$zz$00"] {
            assert!(
                matches!(hasher.verify("pw", bad), Err(PasswordError::Malformed)),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn zero_iterations_is_clamped() {
        let encoded = PasswordHasher::new(0).hash("pw").expect("hash");
        assert!(encoded.starts_with("pbkdf2-sha256$1$"), "got {encoded}");
    }
}
