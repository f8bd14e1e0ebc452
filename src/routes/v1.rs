pub mod counselors;
pub mod payments;
pub mod ratings;
pub mod requests;
pub mod sessions;
use crate::app_state::AppState;
use axum::Router;

pub fn v1_routes() -> Router<AppState> {
    Router::new()
        .merge(counselors::counselors_routes())
        .nest("/requests", requests::requests_routes())
        .nest("/payments", payments::payments_routes())
        .nest("/sessions", sessions::sessions_routes())
        .nest("/ratings", ratings::ratings_routes())
}
