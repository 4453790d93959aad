pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod validators;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::user_routes())
}
