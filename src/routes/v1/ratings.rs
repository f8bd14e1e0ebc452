use crate::handlers::v1::ratings;
use crate::{app_state::AppState, middlewares::auth::auth_middleware};
use axum::routing::{get, put};
use axum::{middleware, Router};

pub fn ratings_routes() -> Router<AppState> {
    Router::new()
        .route("/", put(ratings::submit_rating))
        .route("/{counselor_id}", get(ratings::get_my_rating))
        .layer(middleware::from_fn(auth_middleware))
}
