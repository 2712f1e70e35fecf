use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::realtime::{realtime_routes, RealtimeState};
use appointment_cell::router::appointment_routes;
use appointment_cell::services::SchedulingService;
use doctor_cell::router::doctor_routes;
use doctor_cell::AvailabilityService;
use notification_cell::NotificationFanout;
use shared_config::AppConfig;

/// Everything the cells share for the life of the process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub scheduling: Arc<SchedulingService>,
    pub availability: Arc<AvailabilityService>,
    pub fanout: NotificationFanout,
}

pub fn create_router(state: AppState) -> Router {
    let realtime = RealtimeState {
        config: state.config.clone(),
        scheduling: state.scheduling.clone(),
        availability: state.availability.clone(),
        fanout: state.fanout.clone(),
    };

    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/appointments", appointment_routes(state.config.clone(), state.scheduling))
        .nest("/doctors", doctor_routes(state.config, state.availability))
        .nest("/realtime", realtime_routes(realtime))
}
