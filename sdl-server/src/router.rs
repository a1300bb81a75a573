//! Router construction for the SDL canvas server.

use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the full axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Canvases
        .route("/canvases", post(handlers::canvases::create))
        .route("/canvases", get(handlers::canvases::list))
        .route("/canvases/:id", get(handlers::canvases::get))
        .route("/canvases/:id", delete(handlers::canvases::delete))
        .route("/canvases/:id/reset", post(handlers::canvases::reset))
        // Files and activation
        .route("/canvases/:id/files", post(handlers::systems::load_file))
        .route("/canvases/:id/system", post(handlers::systems::use_system))
        // Generators
        .route("/canvases/:id/generators", post(handlers::generators::add))
        .route("/canvases/:id/generators", get(handlers::generators::list))
        .route(
            "/canvases/:id/generators/start",
            post(handlers::generators::start_all),
        )
        .route(
            "/canvases/:id/generators/stop",
            post(handlers::generators::stop_all),
        )
        .route(
            "/canvases/:id/generators/:gid",
            get(handlers::generators::get),
        )
        .route(
            "/canvases/:id/generators/:gid",
            patch(handlers::generators::update),
        )
        .route(
            "/canvases/:id/generators/:gid",
            delete(handlers::generators::delete),
        )
        .route(
            "/canvases/:id/generators/:gid/start",
            post(handlers::generators::start),
        )
        .route(
            "/canvases/:id/generators/:gid/stop",
            post(handlers::generators::stop),
        )
        // Parameters
        .route("/canvases/:id/parameters", get(handlers::parameters::get))
        .route("/canvases/:id/parameters", put(handlers::parameters::set))
        .route(
            "/canvases/:id/parameters/batch",
            put(handlers::parameters::set_batch),
        )
        // Flows
        .route(
            "/canvases/:id/flows/evaluate",
            post(handlers::flows::evaluate),
        )
        .route("/canvases/:id/flows", get(handlers::flows::get))
        // Tracing
        .route("/canvases/:id/trace", post(handlers::traces::execute))
        .route("/canvases/:id/trace/paths", post(handlers::traces::paths))
        // Metrics
        .route("/canvases/:id/metrics", post(handlers::metrics::add))
        .route("/canvases/:id/metrics", get(handlers::metrics::list))
        .route(
            "/canvases/:id/metrics/stream",
            get(handlers::metrics::stream),
        )
        .route(
            "/canvases/:id/metrics/:mid",
            delete(handlers::metrics::delete),
        )
        .route(
            "/canvases/:id/metrics/:mid/points",
            get(handlers::metrics::points),
        )
        // Diagram and utilization
        .route("/canvases/:id/diagram", get(handlers::diagram::system_diagram))
        .route(
            "/canvases/:id/utilization",
            get(handlers::diagram::utilization),
        )
        // Health
        .route("/health", get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
