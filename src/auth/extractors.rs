use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use time::OffsetDateTime;
use tracing::warn;

use super::credentials::is_token_stale_after_password_change;
use crate::{
    error::AppError,
    state::AppState,
    users::repo_types::{Role, User},
};

/// Authenticated caller, loaded fresh from the database on every request.
pub struct AuthUser(pub User);

fn bearer_token(parts: &Parts) -> Option<&str> {
    let auth = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            AppError::Unauthorized("You are not logged in! Please log in to get access.".into())
        })?;

        let claims = state.credentials.verify_token(token, OffsetDateTime::now_utc())?;

        let user = User::find_by_id(&state.db, claims.sub).await?.ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for deleted user");
            AppError::Unauthorized("The user belonging to this token does no longer exist.".into())
        })?;

        if is_token_stale_after_password_change(claims.iat, user.password_changed_at) {
            warn!(user_id = %user.id, "token issued before password change");
            return Err(AppError::Unauthorized(
                "User recently changed password! Please log in again.".into(),
            ));
        }

        Ok(AuthUser(user))
    }
}

impl AuthUser {
    pub fn restrict_to(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.0.role()) {
            Ok(())
        } else {
            warn!(user_id = %self.0.id, role = %self.0.role, "forbidden");
            Err(AppError::Forbidden(
                "You do not have permission to perform this action.".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use uuid::Uuid;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(h) = header {
            builder = builder.header(AUTHORIZATION, h);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc.def"))), Some("abc.def"));
        assert_eq!(bearer_token(&parts_with(Some("bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }

    fn user_with_role(role: &str) -> AuthUser {
        AuthUser(User {
            id: Uuid::new_v4(),
            name: "Guide".into(),
            email: "g@example.com".into(),
            photo: None,
            role: role.into(),
            password_hash: String::new(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    #[test]
    fn restrict_to_allows_listed_roles_only() {
        let roles = [Role::Admin, Role::LeadGuide];
        assert!(user_with_role("admin").restrict_to(&roles).is_ok());
        assert!(user_with_role("lead-guide").restrict_to(&roles).is_ok());
        let err = user_with_role("guide").restrict_to(&roles).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(user_with_role("user").restrict_to(&roles).is_err());
    }

    #[tokio::test]
    async fn missing_header_is_rejected_before_any_lookup() {
        let state = AppState::fake();
        let mut parts = parts_with(None);
        let err = AuthUser::from_request_parts(&mut parts, &state).await.err().unwrap();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m.contains("not logged in")));
    }

    #[tokio::test]
    async fn forged_token_is_rejected_before_any_lookup() {
        let state = AppState::fake();
        let mut parts = parts_with(Some("Bearer eyJhbGciOiJIUzI1NiJ9.e30.forged"));
        let err = AuthUser::from_request_parts(&mut parts, &state).await.err().unwrap();
        assert!(matches!(err, AppError::Auth(crate::auth::error::AuthError::InvalidToken)));
    }
}
