use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    auth::error::{AuthError, CredentialError},
    config::Environment,
    query::QueryError,
};

pub const GENERIC_MESSAGE: &str = "Something went wrong!";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("mail delivery failed: {0}")]
    Mail(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Error body sent to clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Internal detail attached to error responses; surfaced only in development.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::InvalidOrExpiredResetToken) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Crypto(_)
            | AppError::Config(_)
            | AppError::Mail(_)
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to any client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Auth(AuthError::InvalidCredentials) => "Incorrect email or password".into(),
            AppError::Auth(AuthError::InvalidToken) => "Invalid token. Please log in again!".into(),
            AppError::Auth(AuthError::ExpiredToken) => {
                "Your token has expired! Please log in again.".into()
            }
            AppError::Auth(AuthError::InvalidOrExpiredResetToken) => {
                "Token is invalid or has expired".into()
            }
            AppError::Mail(_) => {
                "There was an error sending the email. Try again later!".into()
            }
            AppError::Validation(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::Crypto(_)
            | AppError::Config(_)
            | AppError::Database(_)
            | AppError::Internal(_) => GENERIC_MESSAGE.into(),
        }
    }
}

fn duplicate_message(detail: Option<&str>) -> String {
    lazy_static! {
        static ref KEY_RE: Regex = Regex::new(r"\((.+?)\)=\((.*)\)").unwrap();
    }
    match detail.and_then(|d| KEY_RE.captures(d)) {
        Some(caps) => format!(
            "Duplicate field value: {} = \"{}\". Please use another value!",
            &caps[1], &caps[2]
        ),
        None => "Duplicate field value. Please use another value!".into(),
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return AppError::NotFound("No document found with that ID".into());
        }
        if let Some(db_err) = err.as_database_error() {
            let detail = db_err
                .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                .and_then(|pg| pg.detail().map(str::to_owned));
            match db_err.code().as_deref() {
                Some("23505") => return AppError::Conflict(duplicate_message(detail.as_deref())),
                Some("23514") => {
                    let constraint = db_err.constraint().unwrap_or("check");
                    return AppError::Validation(format!(
                        "Invalid input data. Constraint {constraint} failed"
                    ));
                }
                Some("22P02") | Some("22007") | Some("22008") => {
                    return AppError::Validation(format!("Invalid input data. {}", db_err.message()));
                }
                _ => {}
            }
        }
        AppError::Database(err)
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Auth(e) => AppError::Auth(e),
            CredentialError::Crypto(msg) => AppError::Crypto(msg),
            CredentialError::Config(msg) => AppError::Config(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();
        if status.is_server_error() {
            error!(%status, error = %detail, "request failed");
        } else {
            debug!(%status, error = %detail, "request rejected");
        }

        let body = ErrorBody {
            status: status_label(status),
            message: self.public_message(),
            error: None,
        };
        let mut res = (status, Json(body)).into_response();
        res.extensions_mut().insert(ErrorDetail(detail));
        res
    }
}

fn status_label(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

/// Rewrites error bodies to include internal detail when running in development.
pub async fn expose_error_detail(
    State(environment): State<Environment>,
    request: Request,
    next: Next,
) -> Response {
    let mut res = next.run(request).await;
    let Some(ErrorDetail(detail)) = res.extensions_mut().remove::<ErrorDetail>() else {
        return res;
    };
    if environment != Environment::Development {
        return res;
    }

    let (parts, body) = res.into_parts();
    let status = parts.status;
    let message = match axum::body::to_bytes(body, 64 * 1024).await {
        Ok(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
            .unwrap_or_else(|| GENERIC_MESSAGE.to_string()),
        Err(_) => GENERIC_MESSAGE.to_string(),
    };
    let body = ErrorBody {
        status: status_label(status),
        message,
        error: Some(detail),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(AppError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Auth(AuthError::ExpiredToken).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Auth(AuthError::InvalidOrExpiredResetToken).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::Config("no secret".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_hide_their_detail() {
        let err = AppError::Internal(anyhow::anyhow!("pool timed out"));
        assert_eq!(err.public_message(), GENERIC_MESSAGE);
        let err = AppError::Mail("ses throttled".into());
        assert!(err.public_message().contains("error sending the email"));
    }

    #[test]
    fn duplicate_message_names_the_key() {
        let msg = duplicate_message(Some("Key (email)=(a@b.io) already exists."));
        assert_eq!(msg, "Duplicate field value: email = \"a@b.io\". Please use another value!");
        assert!(duplicate_message(None).starts_with("Duplicate field value"));
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn response_uses_fail_for_client_errors() {
        let res = AppError::NotFound("No tour found with that ID".into()).into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let json = body_json(res).await;
        assert_eq!(json["status"], "fail");
        assert_eq!(json["message"], "No tour found with that ID");
        assert!(json.get("error").is_none());
    }

    fn app(environment: Environment) -> Router {
        Router::new()
            .route(
                "/boom",
                get(|| async { Err::<(), _>(AppError::Internal(anyhow::anyhow!("disk on fire"))) }),
            )
            .layer(middleware::from_fn_with_state(environment, expose_error_detail))
    }

    #[tokio::test]
    async fn production_hides_internal_detail() {
        let res = app(Environment::Production)
            .oneshot(HttpRequest::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(res).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], GENERIC_MESSAGE);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn development_exposes_internal_detail() {
        let res = app(Environment::Development)
            .oneshot(HttpRequest::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(res).await;
        assert_eq!(json["message"], GENERIC_MESSAGE);
        assert_eq!(json["error"], "disk on fire");
    }
}
