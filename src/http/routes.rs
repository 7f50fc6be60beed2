use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
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
        .route("/session/status", get(handlers::session_status))
        .route("/session/open", post(handlers::open_session))
        .route("/session/disconnect", post(handlers::disconnect_session))
        // Text path
        .route("/translate", post(handlers::translate))
        .route("/mood", get(handlers::get_mood))
        // History
        .route(
            "/history",
            get(handlers::list_history).delete(handlers::clear_history),
        )
        .route("/history/:id", delete(handlers::delete_history_entry))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
