use crate::handlers::v1::requests;
use crate::{app_state::AppState, middlewares::auth::auth_middleware};
use axum::routing::{get, post};
use axum::{middleware, Router};

pub fn requests_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(requests::create_request))
        .route("/{id}", get(requests::get_request))
        .route("/{id}/cancel", post(requests::cancel_request))
        .route("/{id}/matches", get(requests::poll_matches))
        .route("/{id}/accept", post(requests::accept_request))
        .route("/{id}/schedule", post(requests::schedule_request))
        .layer(middleware::from_fn(auth_middleware))
}
