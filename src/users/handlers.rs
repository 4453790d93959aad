use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{CreateUserRequest, UpdateUserRequest, UserEnvelope, UsersEnvelope},
    repo::{NewUser, UserChanges},
    repo_types::{Role, User},
    validators::{normalize_email, validate_name, validate_new_password},
};
use crate::{
    auth::extractors::AuthUser,
    error::AppError,
    extract::{AppJson, AppPath, AppQuery},
    query::{QueryParams, QuerySpec},
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/me", get(get_me))
        .route("/users/:id", get(get_user).patch(update_user).delete(delete_user))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    pub results: usize,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            data,
        }
    }
}

fn not_found() -> AppError {
    AppError::NotFound("No user found with that ID".into())
}

#[instrument(skip(state, current))]
pub async fn list_users(
    State(state): State<AppState>,
    current: AuthUser,
    AppQuery(params): AppQuery<QueryParams>,
) -> Result<Json<ListResponse<UsersEnvelope>>, AppError> {
    current.restrict_to(&[Role::Admin, Role::LeadGuide])?;
    let spec = QuerySpec::from_params(&params)?;
    let users = User::list(&state.db, &spec).await?;
    Ok(Json(ListResponse {
        status: "success",
        requested_at: OffsetDateTime::now_utc(),
        results: users.len(),
        data: UsersEnvelope { users },
    }))
}

#[instrument(skip(current))]
pub async fn get_me(current: AuthUser) -> Json<DataResponse<UserEnvelope>> {
    let AuthUser(user) = current;
    Json(DataResponse::success(UserEnvelope { user }))
}

#[instrument(skip(state, current))]
pub async fn get_user(
    State(state): State<AppState>,
    current: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<DataResponse<UserEnvelope>>, AppError> {
    current.restrict_to(&[Role::Admin, Role::LeadGuide])?;
    let user = User::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(DataResponse::success(UserEnvelope { user })))
}

#[instrument(skip(state, current, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    current: AuthUser,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<DataResponse<UserEnvelope>>), AppError> {
    current.restrict_to(&[Role::Admin])?;
    let name = validate_name(&payload.name)?;
    let email = normalize_email(&payload.email)?;
    validate_new_password(&payload.password, &payload.password_confirm)?;

    let hash = state.credentials.hash_password_blocking(payload.password).await?;
    let role = payload.role.unwrap_or(Role::User);
    let user = User::create(
        &state.db,
        NewUser {
            name: &name,
            email: &email,
            role: role.as_str(),
            photo: payload.photo.as_deref(),
            password_hash: &hash,
        },
    )
    .await?;

    info!(user_id = %user.id, created_by = %current.0.id, "user created");
    Ok((StatusCode::CREATED, Json(DataResponse::success(UserEnvelope { user }))))
}

fn user_changes(payload: UpdateUserRequest) -> Result<UserChanges, AppError> {
    if payload.password.is_some() || payload.password_confirm.is_some() {
        return Err(AppError::Validation(
            "This route is not for password updates. Please use /updateMyPassword.".into(),
        ));
    }
    Ok(UserChanges {
        name: payload.name.as_deref().map(validate_name).transpose()?,
        email: payload.email.as_deref().map(normalize_email).transpose()?,
        photo: payload.photo,
        role: payload.role.map(|r| r.as_str().to_string()),
    })
}

#[instrument(skip(state, current, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    current: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> Result<Json<DataResponse<UserEnvelope>>, AppError> {
    current.restrict_to(&[Role::Admin])?;
    let changes = user_changes(payload)?;
    let user = User::update(&state.db, id, changes).await?.ok_or_else(not_found)?;
    info!(user_id = %user.id, "user updated");
    Ok(Json(DataResponse::success(UserEnvelope { user })))
}

#[instrument(skip(state, current))]
pub async fn delete_user(
    State(state): State<AppState>,
    current: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    current.restrict_to(&[Role::Admin])?;
    if !User::delete(&state.db, id).await? {
        return Err(not_found());
    }
    info!(user_id = %id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
