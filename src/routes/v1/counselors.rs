use crate::handlers::v1::counselors;
use crate::{app_state::AppState, middlewares::auth::auth_middleware};
use axum::routing::{get, put};
use axum::{middleware, Router};

pub fn counselors_routes() -> Router<AppState> {
    Router::new()
        .route("/counselors", get(counselors::list_online_counselors))
        .route("/counselors/me/presence", put(counselors::set_presence))
        .route("/catalog", get(counselors::get_catalog))
        .layer(middleware::from_fn(auth_middleware))
}
