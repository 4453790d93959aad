use axum::{
    extract::State,
    http::StatusCode,
    routing::{patch, post},
    Json, Router,
};
use std::future::Future;

use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse,
            ResetPasswordRequest, SignupRequest, UpdatePasswordRequest,
        },
        error::AuthError,
        extractors::AuthUser,
        reset::sha256_hex,
    },
    error::AppError,
    extract::{AppJson, AppPath},
    mailer::{Email, Mailer},
    state::AppState,
    users::{
        repo::NewUser,
        repo_types::{Role, User},
        validators::{normalize_email, validate_name, validate_new_password},
    },
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/forgotPassword", post(forgot_password))
        .route("/users/resetPassword/:token", patch(reset_password))
        .route("/users/updateMyPassword", patch(update_my_password))
}

/// Stamped one second in the past so a token minted right after the change
/// is not treated as stale.
fn password_changed_at(now: OffsetDateTime) -> OffsetDateTime {
    now - Duration::seconds(1)
}

pub fn reset_email(base_url: &str, to: &str, plaintext: &str) -> Email {
    let reset_url = format!(
        "{}/api/v1/users/resetPassword/{plaintext}",
        base_url.trim_end_matches('/')
    );
    Email {
        to: to.to_string(),
        subject: "Your password reset token (valid for 10 minutes)".into(),
        text: format!(
            "Forgot your password? Submit a PATCH request with your new password and \
             passwordConfirm to: {reset_url}.\nIf you didn't forget your password, please ignore this email!"
        ),
    }
}

/// Sends `email`; on failure runs `rollback` and reports a mail error.
pub async fn send_or_rollback<F, Fut>(
    mailer: &dyn Mailer,
    email: Email,
    rollback: F,
) -> Result<(), AppError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    let to = email.to.clone();
    if let Err(e) = mailer.send(email).await {
        error!(error = %e, to = %to, "reset email failed");
        rollback().await?;
        return Err(AppError::Mail(e.to_string()));
    }
    Ok(())
}

fn sign_for(state: &AppState, user: &User) -> Result<String, AppError> {
    Ok(state
        .credentials
        .issue_token(user.id, OffsetDateTime::now_utc())?)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    AppJson(payload): AppJson<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let name = validate_name(&payload.name)?;
    let email = normalize_email(&payload.email)?;
    validate_new_password(&payload.password, &payload.password_confirm)?;

    // Ensure email is not taken
    if User::find_by_email(&state.db, &email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let hash = state.credentials.hash_password_blocking(payload.password).await?;
    let user = User::create(
        &state.db,
        NewUser {
            name: &name,
            email: &email,
            role: Role::User.as_str(),
            photo: payload.photo.as_deref(),
            password_hash: &hash,
        },
    )
    .await?;

    let token = sign_for(&state, &user)?;
    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((StatusCode::CREATED, Json(AuthResponse::with_user(token, user))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let (Some(email), Some(password)) = (payload.email, payload.password) else {
        return Err(AppError::Validation(
            "Please provide email and password!".into(),
        ));
    };
    let email = email.trim().to_lowercase();

    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AuthError::InvalidCredentials.into());
    };

    let ok = state
        .credentials
        .verify_password_blocking(password, user.password_hash.clone())
        .await?;
    if !ok {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(AuthError::InvalidCredentials.into());
    }

    let token = sign_for(&state, &user)?;
    info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse::new(token)))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = payload.email.trim().to_lowercase();
    let user = User::find_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| AppError::NotFound("There is no user with that email address.".into()))?;

    let reset = state.credentials.generate_reset_token(OffsetDateTime::now_utc())?;
    User::set_reset_token(&state.db, user.id, &reset.hash, reset.expires_at).await?;

    let email = reset_email(&state.config.public_base_url, &user.email, &reset.plaintext);
    let user_id = user.id;
    send_or_rollback(state.mailer.as_ref(), email, || {
        User::clear_reset_token(&state.db, user_id)
    })
    .await?;

    info!(user_id = %user.id, "reset token sent");
    Ok(Json(MessageResponse {
        status: "success",
        message: "Token sent to email!".into(),
    }))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    AppPath(token): AppPath<String>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = User::find_by_reset_hash(&state.db, &sha256_hex(&token))
        .await?
        .ok_or(AuthError::InvalidOrExpiredResetToken)?;

    let now = OffsetDateTime::now_utc();
    state.credentials.consume_reset_token(
        &token,
        user.password_reset_token.as_deref(),
        user.password_reset_expires,
        now,
    )?;
    validate_new_password(&payload.password, &payload.password_confirm)?;

    let hash = state.credentials.hash_password_blocking(payload.password).await?;
    let user = User::redeem_reset_token(
        &state.db,
        &sha256_hex(&token),
        &hash,
        password_changed_at(now),
        OffsetDateTime::now_utc(),
    )
    .await?
    .ok_or_else(|| {
        warn!(user_id = %user.id, "reset token redeemed concurrently or expired");
        AuthError::InvalidOrExpiredResetToken
    })?;

    let token = sign_for(&state, &user)?;
    info!(user_id = %user.id, "password reset");
    Ok(Json(AuthResponse::new(token)))
}

#[instrument(skip(state, current, payload))]
pub async fn update_my_password(
    State(state): State<AppState>,
    current: AuthUser,
    AppJson(payload): AppJson<UpdatePasswordRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let AuthUser(user) = current;
    let ok = state
        .credentials
        .verify_password_blocking(payload.password_current, user.password_hash.clone())
        .await?;
    if !ok {
        warn!(user_id = %user.id, "wrong current password");
        return Err(AppError::Unauthorized("Your current password is wrong.".into()));
    }
    validate_new_password(&payload.password, &payload.password_confirm)?;

    let hash = state.credentials.hash_password_blocking(payload.password).await?;
    let user = User::update_password(
        &state.db,
        user.id,
        &hash,
        password_changed_at(OffsetDateTime::now_utc()),
    )
    .await?;

    let token = sign_for(&state, &user)?;
    info!(user_id = %user.id, "password updated");
    Ok(Json(AuthResponse::new(token)))
}
