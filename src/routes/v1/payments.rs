use crate::handlers::v1::payments;
use crate::{app_state::AppState, middlewares::auth::auth_middleware};
use axum::routing::post;
use axum::{middleware, Router};

pub fn payments_routes() -> Router<AppState> {
    // The provider callback authenticates with its signature, not a user identity.
    let protected = Router::new()
        .route("/obligations", post(payments::create_obligation))
        .layer(middleware::from_fn(auth_middleware));

    Router::new()
        .route("/callback", post(payments::payment_callback))
        .merge(protected)
}
