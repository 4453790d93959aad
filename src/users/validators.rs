use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims and lowercases, then checks the shape.
pub fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Please provide a valid email".into()));
    }
    Ok(email)
}

pub fn validate_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Please tell us your name!".into()));
    }
    Ok(name.to_string())
}

pub fn validate_new_password(password: &str, confirm: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must contain at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(AppError::Validation("Passwords are not the same!".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        assert_eq!(normalize_email("  Jonas@Example.COM ").unwrap(), "jonas@example.com");
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("a b@c.d").is_err());
    }

    #[test]
    fn name_must_not_be_blank() {
        assert_eq!(validate_name("  Lisa ").unwrap(), "Lisa");
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn password_rules() {
        assert!(validate_new_password("pass1234", "pass1234").is_ok());
        assert!(validate_new_password("short", "short").is_err());
        let err = validate_new_password("pass1234", "pass12345").unwrap_err();
        assert_eq!(err.to_string(), "Passwords are not the same!");
    }
}
