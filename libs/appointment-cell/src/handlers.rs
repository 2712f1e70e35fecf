use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::Actor;
use shared_models::error::AppError;

use crate::models::{
    AppointmentQueryParams, BookAppointmentRequest, CheckAvailabilityQuery,
    RescheduleAppointmentRequest, SlotKey, SlotsQuery, SubmitReviewRequest, UpdateStatusRequest,
};
use crate::services::SchedulingService;

// ==============================================================================
// BOOKING AND LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(service): State<Arc<SchedulingService>>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = service.book(actor, request).await?;

    Ok((StatusCode::CREATED, Json(json!({ "appointment": appointment }))))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(service): State<Arc<SchedulingService>>,
    Path(appointment_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = service
        .update_status(actor, appointment_id, request.target_status)
        .await?;

    Ok(Json(json!({ "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(service): State<Arc<SchedulingService>>,
    Path(appointment_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = service
        .reschedule(actor, appointment_id, request.date, request.slot)
        .await?;

    Ok(Json(json!({ "appointment": appointment })))
}

// ==============================================================================
// READ HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_appointments(
    State(service): State<Arc<SchedulingService>>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<AppointmentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let page = service.list_appointments(actor, params).await?;
    Ok(Json(json!(page)))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(service): State<Arc<SchedulingService>>,
    Path(appointment_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    let appointment = service.get_appointment(actor, appointment_id).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn get_provider_slots(
    State(service): State<Arc<SchedulingService>>,
    Path(provider_id): Path<Uuid>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = service.available_slots(provider_id, query.date).await?;

    Ok(Json(json!({
        "providerId": provider_id,
        "date": query.date,
        "slots": slots,
    })))
}

#[axum::debug_handler]
pub async fn check_availability(
    State(service): State<Arc<SchedulingService>>,
    Query(query): Query<CheckAvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let key = SlotKey::new(query.provider_id, query.date, query.slot);
    let available = service.check_availability(key).await?;

    Ok(Json(json!({ "available": available })))
}

// ==============================================================================
// REVIEW HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn submit_review(
    State(service): State<Arc<SchedulingService>>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<SubmitReviewRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let review = service.submit_review(actor, request).await?;

    Ok((StatusCode::CREATED, Json(json!({ "review": review }))))
}

#[axum::debug_handler]
pub async fn get_provider_reviews(
    State(service): State<Arc<SchedulingService>>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let reviews = service.provider_reviews(provider_id).await?;
    Ok(Json(json!(reviews)))
}
