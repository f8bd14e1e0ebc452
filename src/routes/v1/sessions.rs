use crate::handlers::v1::sessions;
use crate::websocket::handlers::websocket_handler;
use crate::{app_state::AppState, middlewares::auth::auth_middleware};
use axum::routing::{get, post};
use axum::{middleware, Router};

pub fn sessions_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(sessions::list_sessions))
        .route("/{id}", get(sessions::get_session))
        .route("/{id}/dismiss", post(sessions::dismiss_session))
        .route("/{id}/end", post(sessions::end_session))
        .route(
            "/{id}/messages",
            get(sessions::get_messages).post(sessions::send_message),
        )
        .route("/{id}/read", post(sessions::mark_read))
        .route("/{id}/ws", get(websocket_handler))
        .layer(middleware::from_fn(auth_middleware))
}
