use thiserror::Error;

/// Authentication failures reported by the credential layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid token")]
    InvalidToken,
    #[error("expired token")]
    ExpiredToken,
    #[error("invalid or expired reset token")]
    InvalidOrExpiredResetToken,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("configuration error: {0}")]
    Config(String),
}
