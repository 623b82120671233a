//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Upload pipeline
        .route("/v1/uploads", post(handlers::create_upload))
        .route("/v1/progress", get(handlers::current_progress))
        .route(
            "/v1/uploads/{upload_id}/progress",
            get(handlers::get_upload_progress),
        );

    let mut router = Router::new().merge(api_routes);

    // See crate::metrics for the exposure caveat.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
