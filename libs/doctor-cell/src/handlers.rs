use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::Actor;
use shared_models::error::AppError;

use crate::models::SetAvailabilityRequest;
use crate::services::AvailabilityService;

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn get_availability(
    State(service): State<Arc<AvailabilityService>>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let availability = service.get_availability(provider_id).await?;
    Ok(Json(json!(availability)))
}

#[axum::debug_handler]
pub async fn get_template_slots(
    State(service): State<Arc<AvailabilityService>>,
    Path(provider_id): Path<Uuid>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = service.slots_for(provider_id, query.date).await?;

    Ok(Json(json!({
        "provider_id": provider_id,
        "date": query.date,
        "slots": slots,
    })))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn set_availability(
    State(service): State<Arc<AvailabilityService>>,
    Path(provider_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<SetAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let availability = service.set_availability(actor, provider_id, request).await?;
    Ok(Json(json!(availability)))
}
