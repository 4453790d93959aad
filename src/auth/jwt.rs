use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::{
    claims::Claims,
    error::{AuthError, CredentialError},
};
use crate::config::JwtConfig;

/// Ten years.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

/// HS256 signing and verification keys with issuer/audience binding.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(config: &JwtConfig) -> Result<Self, CredentialError> {
        if config.secret.trim().is_empty() {
            return Err(CredentialError::Config("jwt secret is empty".into()));
        }
        if config.ttl_minutes <= 0 || config.ttl_minutes > MAX_TTL_MINUTES {
            return Err(CredentialError::Config(format!(
                "jwt ttl must be between 1 and {MAX_TTL_MINUTES} minutes"
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: Duration::minutes(config.ttl_minutes),
        })
    }

    pub fn sign(&self, user_id: Uuid, issued_at: OffsetDateTime) -> Result<String, CredentialError> {
        let claims = Claims {
            sub: user_id,
            iat: issued_at.unix_timestamp(),
            exp: issued_at
                .checked_add(self.ttl)
                .ok_or_else(|| CredentialError::Config("jwt expiry out of range".into()))?
                .unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CredentialError::Config(format!("jwt signing: {e}")))?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    /// Expiry is checked against `now` with no leeway: a token is dead from
    /// the second `iat + ttl` onward.
    pub fn verify(&self, token: &str, now: OffsetDateTime) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            debug!(error = %e, "jwt rejected");
            AuthError::InvalidToken
        })?;
        if now.unix_timestamp() >= data.claims.exp {
            debug!(user_id = %data.claims.sub, "jwt expired");
            return Err(AuthError::ExpiredToken);
        }
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
pub(crate) fn test_jwt_config(secret: &str, issuer: &str, audience: &str) -> JwtConfig {
    JwtConfig {
        secret: secret.into(),
        issuer: issuer.into(),
        audience: audience.into(),
        ttl_minutes: 5,
    }
}
