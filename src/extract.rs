//! Drop-in replacements for axum's `Json`, `Path` and `Query` extractors whose
//! rejections go through `AppError`, so malformed ids, bodies and query
//! strings get the same `{status, message}` envelope and a 400.

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::request::Parts,
    Json,
};

use crate::error::AppError;

#[derive(Debug)]
pub struct AppJson<T>(pub T);

#[derive(Debug)]
pub struct AppPath<T>(pub T);

#[derive(Debug)]
pub struct AppQuery<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(format!("Invalid input data. {}", rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(format!("Invalid input data. {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(format!("Invalid query string. {}", rejection.body_text()))
    }
}

#[async_trait]
impl<T, S> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[async_trait]
impl<T, S> FromRequestParts<S> for AppPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

#[async_trait]
impl<T, S> FromRequestParts<S> for AppQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        routing::{get, post},
        Router,
    };
    use serde::Deserialize;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[derive(Deserialize)]
    struct Named {
        name: String,
    }

    fn app() -> Router {
        Router::new()
            .route("/items/:id", get(|AppPath(id): AppPath<Uuid>| async move { id.to_string() }))
            .route("/items", post(|AppJson(body): AppJson<Named>| async move { body.name }))
    }

    async fn call(req: HttpRequest<Body>) -> (StatusCode, serde_json::Value) {
        let res = app().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn bad_path_id_is_a_json_400() {
        let (status, json) =
            call(HttpRequest::get("/items/not-a-uuid").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "fail");
        assert!(json["message"].as_str().unwrap().starts_with("Invalid input data."));
    }

    #[tokio::test]
    async fn missing_body_field_is_a_json_400() {
        let req = HttpRequest::post("/items")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"email":"a@b.io"}"#))
            .unwrap();
        let (status, json) = call(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "fail");
        assert!(json["message"].as_str().unwrap().contains("missing field `name`"));
    }

    #[tokio::test]
    async fn missing_content_type_is_a_json_400() {
        let req = HttpRequest::post("/items")
            .body(Body::from(r#"{"name":"x"}"#))
            .unwrap();
        let (status, json) = call(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "fail");
    }

    #[tokio::test]
    async fn valid_extractions_pass_through() {
        let id = Uuid::new_v4();
        let res = app()
            .oneshot(HttpRequest::get(format!("/items/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
