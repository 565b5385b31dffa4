//! Credential hashing. Passwords are stored as salted PBKDF2-HMAC-SHA256 digests,
//! encoded as `pbkdf2-sha256$<iterations>$<salt>$<hash>` with standard base64.

use std::num::NonZeroU32;

use base64::{engine::general_purpose, Engine};
use ring::{
    digest, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};

use crate::error::AppError;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = digest::SHA256_OUTPUT_LEN;
const ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(iterations) => iterations,
    None => panic!("iteration count must be non-zero"),
};

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| AppError::Credential("failed to generate password salt".to_string()))?;

    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        ITERATIONS,
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!(
        "{SCHEME}${}${}${}",
        ITERATIONS,
        general_purpose::STANDARD.encode(salt),
        general_purpose::STANDARD.encode(hash)
    ))
}

/// Checks `password` against a value produced by [`hash_password`]. Malformed values never verify.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    let Some(iterations) = iterations.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (
        general_purpose::STANDARD.decode(salt),
        general_purpose::STANDARD.decode(hash),
    ) else {
        return false;
    };

    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_same_password() {
        let encoded = hash_password("s3cret").unwrap();

        assert!(encoded.starts_with("pbkdf2-sha256$100000$"));
        assert!(verify_password("s3cret", &encoded));
        assert!(!verify_password("S3cret", &encoded));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let first = hash_password("same").unwrap();
        let second = hash_password("same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_values_do_not_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "plaintext"));
        assert!(!verify_password("x", "pbkdf2-sha256$0$AAAA$AAAA"));
        assert!(!verify_password("x", "md5$1$AAAA$AAAA"));
    }
}
