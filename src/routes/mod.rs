mod adaptive;
mod flags;
mod health;
mod proposals;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route(
            "/api/adaptive-query",
            post(adaptive::adaptive_query).fallback(fallback_handler),
        )
        .route(
            "/api/personalization",
            post(adaptive::personalize_draft).fallback(fallback_handler),
        )
        .route(
            "/api/feedback",
            post(adaptive::submit_feedback).fallback(fallback_handler),
        )
        .route(
            "/api/profiles/:learnerId/:sessionId",
            get(adaptive::get_profile).fallback(fallback_handler),
        )
        .route(
            "/api/flags",
            get(flags::get_flags)
                .put(flags::update_flags)
                .fallback(fallback_handler),
        )
        .route(
            "/api/flags/:sessionId",
            get(flags::session_activation)
                .put(flags::update_session_overrides)
                .fallback(fallback_handler),
        )
        .route(
            "/api/optimizer/proposals",
            get(proposals::list).fallback(fallback_handler),
        )
        .route(
            "/api/optimizer/proposals/:id",
            get(proposals::get_one).fallback(fallback_handler),
        )
        .route(
            "/api/optimizer/proposals/:id/apply",
            post(proposals::apply).fallback(fallback_handler),
        )
        .route(
            "/api/optimizer/proposals/:id/reject",
            post(proposals::reject).fallback(fallback_handler),
        );

    for path in ["/health", "/api/health"] {
        app = app.nest(path, health::router());
    }

    app.fallback(fallback_handler).with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found").into_response()
}
