use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control
        .route("/session/bootstrap", post(handlers::bootstrap))
        .route("/session/retry", post(handlers::retry))
        .route("/session/start", post(handlers::start_session))
        .route("/session/end", post(handlers::end_session))
        .route("/session/mute", post(handlers::set_muted))
        // Session queries
        .route("/session", get(handlers::get_status))
        .route("/session/transcript", get(handlers::get_transcript))
        // The interview page is served from another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
