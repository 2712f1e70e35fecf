use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, patch},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::SchedulingService;

pub fn appointment_routes(config: Arc<AppConfig>, service: Arc<SchedulingService>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment).get(handlers::list_appointments))
        .route("/check-availability", get(handlers::check_availability))
        .route("/reviews", post(handlers::submit_review))
        .route("/providers/{provider_id}/slots", get(handlers::get_provider_slots))
        .route("/providers/{provider_id}/reviews", get(handlers::get_provider_reviews))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(service)
}
