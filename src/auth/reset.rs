//! Password-reset tokens.
//!
//! The plaintext token leaves the process once, inside the reset link. Only
//! its SHA-256 digest and an absolute expiry are persisted.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use super::error::{AuthError, CredentialError};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct ResetToken {
    /// Sent to the user; never stored.
    pub plaintext: String,
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn generate(now: OffsetDateTime, ttl: Duration) -> Result<ResetToken, CredentialError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CredentialError::Crypto(format!("os rng unavailable: {e}")))?;
    let expires_at = now
        .checked_add(ttl)
        .ok_or_else(|| CredentialError::Config("reset token expiry out of range".into()))?;
    let plaintext = hex::encode(bytes);
    let hash = sha256_hex(&plaintext);
    Ok(ResetToken {
        plaintext,
        hash,
        expires_at,
    })
}

/// Equality whose running time depends only on the input lengths.
pub fn digests_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Checks a presented token against the stored digest and expiry.
pub fn consume(
    presented: &str,
    stored_hash: Option<&str>,
    stored_expiry: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> Result<(), AuthError> {
    let (Some(stored_hash), Some(expiry)) = (stored_hash, stored_expiry) else {
        return Err(AuthError::InvalidOrExpiredResetToken);
    };
    let matches = digests_match(&sha256_hex(presented), stored_hash);
    if !matches || now >= expiry {
        return Err(AuthError::InvalidOrExpiredResetToken);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn generated_token_has_256_bits_and_stores_only_digest() {
        let token = generate(now(), Duration::minutes(10)).unwrap();
        assert_eq!(token.plaintext.len(), 64);
        assert!(token.plaintext.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(token.hash, sha256_hex(&token.plaintext));
        assert_ne!(token.hash, token.plaintext);
        assert_eq!(token.expires_at, now() + Duration::minutes(10));
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate(now(), Duration::minutes(10)).unwrap();
        let b = generate(now(), Duration::minutes(10)).unwrap();
        assert_ne!(a.plaintext, b.plaintext);
    }

    #[test]
    fn expiry_past_the_calendar_is_a_config_error() {
        let end_of_time = time::Date::MAX.midnight().assume_utc();
        assert!(matches!(
            generate(end_of_time, Duration::minutes(10)),
            Err(CredentialError::Config(_))
        ));
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_compare_checks_every_byte() {
        let digest = sha256_hex("abc");
        assert!(digests_match(&digest, &sha256_hex("abc")));
        let mut last_flipped = digest.clone();
        last_flipped.pop();
        last_flipped.push('0');
        assert!(!digests_match(&digest, &last_flipped));
        assert!(!digests_match(&digest, &digest[..63]));
        assert!(!digests_match("", &digest));
    }

    #[test]
    fn consume_accepts_matching_unexpired_token() {
        let token = generate(now(), Duration::minutes(10)).unwrap();
        let at = now() + Duration::minutes(9);
        assert!(consume(&token.plaintext, Some(&token.hash), Some(token.expires_at), at).is_ok());
    }

    #[test]
    fn consume_rejects_at_or_after_expiry() {
        let token = generate(now(), Duration::minutes(10)).unwrap();
        for at in [token.expires_at, token.expires_at + Duration::seconds(1)] {
            assert_eq!(
                consume(&token.plaintext, Some(&token.hash), Some(token.expires_at), at),
                Err(AuthError::InvalidOrExpiredResetToken)
            );
        }
    }

    #[test]
    fn consume_rejects_wrong_token_or_missing_state() {
        let token = generate(now(), Duration::minutes(10)).unwrap();
        assert_eq!(
            consume("deadbeef", Some(&token.hash), Some(token.expires_at), now()),
            Err(AuthError::InvalidOrExpiredResetToken)
        );
        assert_eq!(
            consume(&token.hash, Some(&token.hash), Some(token.expires_at), now()),
            Err(AuthError::InvalidOrExpiredResetToken)
        );
        assert_eq!(
            consume(&token.plaintext, None, Some(token.expires_at), now()),
            Err(AuthError::InvalidOrExpiredResetToken)
        );
        assert_eq!(
            consume(&token.plaintext, Some(&token.hash), None, now()),
            Err(AuthError::InvalidOrExpiredResetToken)
        );
    }
}
