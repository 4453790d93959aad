use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{
    claims::Claims,
    error::{AuthError, CredentialError},
    jwt::{JwtKeys, MAX_TTL_MINUTES},
    password::Argon2Hasher,
    reset::{self, ResetToken},
};
use crate::config::AppConfig;

/// Password, bearer-token and reset-token operations, configured once at
/// startup and shared through `AppState`.
#[derive(Clone)]
pub struct CredentialManager {
    hasher: Argon2Hasher,
    keys: JwtKeys,
    reset_ttl: Duration,
}

impl CredentialManager {
    pub fn new(config: &AppConfig) -> Result<Self, CredentialError> {
        if config.reset_token_ttl_minutes <= 0 || config.reset_token_ttl_minutes > MAX_TTL_MINUTES {
            return Err(CredentialError::Config(format!(
                "reset token ttl must be between 1 and {MAX_TTL_MINUTES} minutes"
            )));
        }
        Ok(Self {
            hasher: Argon2Hasher::new(&config.hash)?,
            keys: JwtKeys::new(&config.jwt)?,
            reset_ttl: Duration::minutes(config.reset_token_ttl_minutes),
        })
    }

    pub fn hash_password(&self, plain: &str) -> Result<String, CredentialError> {
        self.hasher.hash(plain)
    }

    pub fn verify_password(&self, plain: &str, hash: &str) -> Result<bool, CredentialError> {
        self.hasher.verify(plain, hash)
    }

    /// [`Self::hash_password`] on the blocking pool.
    pub async fn hash_password_blocking(&self, plain: String) -> Result<String, CredentialError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.hash_password(&plain))
            .await
            .map_err(|e| CredentialError::Crypto(format!("hashing task failed: {e}")))?
    }

    /// [`Self::verify_password`] on the blocking pool.
    pub async fn verify_password_blocking(
        &self,
        plain: String,
        hash: String,
    ) -> Result<bool, CredentialError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.verify_password(&plain, &hash))
            .await
            .map_err(|e| CredentialError::Crypto(format!("verify task failed: {e}")))?
    }

    pub fn issue_token(&self, subject: Uuid, issued_at: OffsetDateTime) -> Result<String, CredentialError> {
        self.keys.sign(subject, issued_at)
    }

    pub fn verify_token(&self, token: &str, now: OffsetDateTime) -> Result<Claims, AuthError> {
        self.keys.verify(token, now)
    }

    pub fn generate_reset_token(&self, now: OffsetDateTime) -> Result<ResetToken, CredentialError> {
        reset::generate(now, self.reset_ttl)
    }

    pub fn consume_reset_token(
        &self,
        presented: &str,
        stored_hash: Option<&str>,
        stored_expiry: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        reset::consume(presented, stored_hash, stored_expiry, now)
    }
}

/// True when the token predates the last password change.
///
/// The change time is truncated to whole seconds before comparing, so a token
/// issued within the same second as the change is still accepted.
pub fn is_token_stale_after_password_change(
    issued_at: i64,
    password_changed_at: Option<OffsetDateTime>,
) -> bool {
    match password_changed_at {
        Some(changed_at) => {
            let changed_ms = changed_at.unix_timestamp_nanos() / 1_000_000;
            let changed_secs = changed_ms.div_euclid(1000) as i64;
            issued_at < changed_secs
        }
        None => false,
    }
}

#[cfg(test)]
pub(crate) fn test_manager() -> CredentialManager {
    CredentialManager {
        hasher: super::password::test_hasher(),
        keys: JwtKeys::new(&super::jwt::test_jwt_config("test-secret", "test-issuer", "test-aud"))
            .expect("valid jwt config"),
        reset_ttl: Duration::minutes(10),
    }
}
