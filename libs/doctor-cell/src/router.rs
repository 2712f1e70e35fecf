use std::sync::Arc;

use axum::{
    Router,
    routing::{get, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::AvailabilityService;

pub fn doctor_routes(config: Arc<AppConfig>, service: Arc<AvailabilityService>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/{provider_id}/availability", get(handlers::get_availability))
        .route("/{provider_id}/available-slots", get(handlers::get_template_slots));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/{provider_id}/availability", put(handlers::set_availability))
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(service)
}
