//! Router configuration for the HTTP API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Create the application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Schedule document
        .route(
            "/{owner}/state",
            get(handlers::get_state).put(handlers::put_state),
        )
        // Solver
        .route("/{owner}/solve/range", post(handlers::solve_range))
        .route("/solve/abort", post(handlers::abort_solver))
        .route("/solve/progress", get(handlers::solver_progress))
        // Publication management
        .route(
            "/{owner}/web/publish",
            get(handlers::get_publication)
                .post(handlers::publish)
                .delete(handlers::unpublish),
        )
        .route(
            "/{owner}/web/publish/rotate",
            post(handlers::rotate_publication),
        )
        // Public iCal feeds
        .route("/ical/{token}/all.ics", get(handlers::ical_feed))
        .route(
            "/ical/{token}/clinician/{clinician_id}",
            get(handlers::ical_clinician_feed),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
