use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{
        CreateTourRequest, PlanEnvelope, StatsEnvelope, TourEnvelope, ToursEnvelope,
        UpdateTourRequest,
    },
    repo,
    repo_types::{MonthlyPlan, TourStats},
};
use crate::{
    auth::extractors::AuthUser,
    error::AppError,
    extract::{AppJson, AppPath, AppQuery},
    query::{QueryParams, QuerySpec},
    state::AppState,
    users::{
        handlers::{DataResponse, ListResponse},
        repo_types::Role,
    },
};

pub fn tour_routes() -> Router<AppState> {
    Router::new()
        .route("/tours/top-5-cheap", get(top_five_cheap))
        .route("/tours/tour-stats", get(tour_stats))
        .route("/tours/monthly-plan/:year", get(monthly_plan))
        .route("/tours", get(list_tours).post(create_tour))
        .route("/tours/:id", get(get_tour).patch(update_tour).delete(delete_tour))
}

fn not_found() -> AppError {
    AppError::NotFound("No tour found with that ID".into())
}

/// Secret tours are invisible to reads, so a write that leaves one secret
/// echoes the id only.
pub fn secret_stub(id: Uuid) -> serde_json::Value {
    serde_json::json!({ "id": id, "secretTour": true })
}

async fn visible_document(
    state: &AppState,
    id: Uuid,
    secret: bool,
) -> Result<serde_json::Value, AppError> {
    if secret {
        return Ok(secret_stub(id));
    }
    repo::find(&state.db, id).await?.ok_or_else(not_found)
}

/// Overrides limit, sort and projection with the "top 5 cheap" preset.
/// Other filters from the caller still apply.
pub fn top_five_cheap_params(mut params: QueryParams) -> QueryParams {
    params.insert("limit".into(), "5".into());
    params.insert("sort".into(), "-ratingsAverage,price".into());
    params.insert(
        "fields".into(),
        "name,price,ratingsAverage,summary,difficulty".into(),
    );
    params
}

async fn list_response(
    state: &AppState,
    params: &QueryParams,
) -> Result<Json<ListResponse<ToursEnvelope>>, AppError> {
    let spec = QuerySpec::from_params(params)?;
    let tours = repo::list(&state.db, &spec).await?;
    Ok(Json(ListResponse {
        status: "success",
        requested_at: OffsetDateTime::now_utc(),
        results: tours.len(),
        data: ToursEnvelope { tours },
    }))
}

#[instrument(skip(state))]
pub async fn top_five_cheap(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<QueryParams>,
) -> Result<Json<ListResponse<ToursEnvelope>>, AppError> {
    list_response(&state, &top_five_cheap_params(params)).await
}

#[instrument(skip(state, _current))]
pub async fn list_tours(
    State(state): State<AppState>,
    _current: AuthUser,
    AppQuery(params): AppQuery<QueryParams>,
) -> Result<Json<ListResponse<ToursEnvelope>>, AppError> {
    list_response(&state, &params).await
}

#[instrument(skip(state))]
pub async fn get_tour(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<DataResponse<TourEnvelope>>, AppError> {
    let tour = repo::find(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(DataResponse::success(TourEnvelope { tour })))
}

#[instrument(skip(state, payload))]
pub async fn create_tour(
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateTourRequest>,
) -> Result<(StatusCode, Json<DataResponse<TourEnvelope>>), AppError> {
    let new = payload.validate()?;
    let secret = new.secret_tour;
    let id = repo::create(&state.db, new).await?;
    info!(tour_id = %id, secret, "tour created");

    let tour = visible_document(&state, id, secret).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::success(TourEnvelope { tour }))))
}

#[instrument(skip(state, payload))]
pub async fn update_tour(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateTourRequest>,
) -> Result<Json<DataResponse<TourEnvelope>>, AppError> {
    let changes = payload.validate()?;
    let secret = repo::update(&state.db, id, changes)
        .await?
        .ok_or_else(not_found)?;
    info!(tour_id = %id, secret, "tour updated");
    let tour = visible_document(&state, id, secret).await?;
    Ok(Json(DataResponse::success(TourEnvelope { tour })))
}

#[instrument(skip(state, current))]
pub async fn delete_tour(
    State(state): State<AppState>,
    current: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    current.restrict_to(&[Role::Admin, Role::LeadGuide])?;
    if !repo::delete(&state.db, id).await? {
        return Err(not_found());
    }
    info!(tour_id = %id, deleted_by = %current.0.id, "tour deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn tour_stats(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<StatsEnvelope<TourStats>>>, AppError> {
    let stats = repo::stats(&state.db).await?;
    Ok(Json(DataResponse::success(StatsEnvelope { stats })))
}

#[instrument(skip(state))]
pub async fn monthly_plan(
    State(state): State<AppState>,
    AppPath(year): AppPath<String>,
) -> Result<Json<DataResponse<PlanEnvelope<MonthlyPlan>>>, AppError> {
    let year: i32 = year
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("Invalid year: {year}")))?;
    let plan = repo::monthly_plan(&state.db, year).await?;
    Ok(Json(DataResponse::success(PlanEnvelope { plan })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let app = tour_routes().with_state(AppState::fake());
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[test]
    fn alias_overrides_preset_keys_only() {
        let mut params = QueryParams::new();
        params.insert("limit".into(), "50".into());
        params.insert("difficulty".into(), "easy".into());
        let params = top_five_cheap_params(params);
        assert_eq!(params["limit"], "5");
        assert_eq!(params["sort"], "-ratingsAverage,price");
        assert_eq!(params["difficulty"], "easy");

        let spec = QuerySpec::from_params(&params).unwrap();
        assert_eq!(spec.pagination.limit, 5);
        assert_eq!(spec.sort.len(), 2);
    }

    #[test]
    fn secret_writes_echo_only_the_id() {
        let id = Uuid::nil();
        let stub = secret_stub(id);
        assert_eq!(stub, serde_json::json!({ "id": id, "secretTour": true }));
    }

    #[tokio::test]
    async fn listing_requires_login() {
        let (status, json) = send(Request::get("/tours").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["status"], "fail");
    }

    #[tokio::test]
    async fn delete_requires_login() {
        let uri = format!("/tours/{}", Uuid::new_v4());
        let (status, _) = send(Request::delete(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn monthly_plan_rejects_non_numeric_year() {
        let (status, json) =
            send(Request::get("/tours/monthly-plan/next").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Invalid year: next");
    }

    #[tokio::test]
    async fn create_validates_before_touching_the_database() {
        let req = Request::post("/tours")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "name": "Tiny" }).to_string()))
            .unwrap();
        let (status, json) = send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("A tour must have a duration"));
    }
}
