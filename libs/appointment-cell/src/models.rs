use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use shared_database::DbError;
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Requested,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Requested,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Requested => "requested",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// Holds its slot.
    pub fn is_active(&self) -> bool {
        *self != AppointmentStatus::Cancelled
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "requested" => Ok(AppointmentStatus::Requested),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(format!("Unknown appointment status: {}", other)),
        }
    }
}

/// Reservation key: one provider, one calendar date, one slot start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub start: NaiveTime,
}

impl SlotKey {
    pub fn new(provider_id: Uuid, date: NaiveDate, start: NaiveTime) -> Self {
        Self { provider_id, date, start }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}T{}", self.provider_id, self.date, self.start.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub symptoms: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.provider_id, self.appointment_date, self.start_time)
    }

    /// The other party on the record, if `user_id` is one of them.
    pub fn counterpart_of(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.patient_id {
            Some(self.provider_id)
        } else if user_id == self.provider_id {
            Some(self.patient_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentRequest {
    #[serde(alias = "providerId")]
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub slot: NaiveTime,
    pub symptoms: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    #[serde(alias = "targetStatus", alias = "status")]
    pub target_status: AppointmentStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub date: NaiveDate,
    pub slot: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReviewRequest {
    #[serde(alias = "appointmentId")]
    pub appointment_id: Uuid,
    pub rating: i64,
    pub comment: String,
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentQueryParams {
    pub status: Option<AppointmentStatus>,
    #[serde(alias = "dateFrom")]
    pub date_from: Option<NaiveDate>,
    #[serde(alias = "dateTo")]
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Which side of the appointments a listing is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    Patient(Uuid),
    Provider(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentFilter {
    pub scope: ListScope,
    pub status: Option<AppointmentStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
    pub page: u32,
    pub limit: u32,
}

impl AppointmentFilter {
    pub fn new(scope: ListScope, params: AppointmentQueryParams) -> Self {
        Self {
            scope,
            status: params.status,
            date_from: params.date_from,
            date_to: params.date_to,
            search: params
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            page: params.page.unwrap_or(1).max(1),
            limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    /// In-process evaluation of everything but paging.
    pub fn matches(&self, appointment: &Appointment) -> bool {
        let in_scope = match self.scope {
            ListScope::Patient(id) => appointment.patient_id == id,
            ListScope::Provider(id) => appointment.provider_id == id,
        };
        if !in_scope {
            return false;
        }
        if self.status.is_some_and(|s| s != appointment.status) {
            return false;
        }
        if self.date_from.is_some_and(|d| appointment.appointment_date < d) {
            return false;
        }
        if self.date_to.is_some_and(|d| appointment.appointment_date > d) {
            return false;
        }
        match &self.search {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                [&appointment.symptoms, &appointment.notes]
                    .into_iter()
                    .flatten()
                    .any(|text| text.to_lowercase().contains(&needle))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPage {
    pub items: Vec<Appointment>,
    pub total: u64,
    pub total_pages: u64,
    pub page: u32,
    pub limit: u32,
}

impl AppointmentPage {
    pub fn new(items: Vec<Appointment>, total: u64, filter: &AppointmentFilter) -> Self {
        Self {
            items,
            total,
            total_pages: total.div_ceil(u64::from(filter.limit)),
            page: filter.page,
            limit: filter.limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlotView {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub available: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAvailabilityQuery {
    #[serde(alias = "provider_id")]
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub slot: NaiveTime,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReviews {
    pub provider_id: Uuid,
    pub reviews: Vec<Review>,
    pub average_rating: Option<f64>,
}

impl ProviderReviews {
    pub fn new(provider_id: Uuid, reviews: Vec<Review>) -> Self {
        let average_rating = (!reviews.is_empty()).then(|| {
            let sum: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
            f64::from(sum) / reviews.len() as f64
        });

        Self { provider_id, reviews, average_rating }
    }
}

// ==============================================================================
// ERROR MODELS
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound(Uuid),

    #[error("Slot {0} is not available")]
    SlotUnavailable(SlotKey),

    #[error("Appointment {0} has already been reviewed")]
    DuplicateReview(Uuid),

    #[error("Appointment {0} was modified concurrently")]
    ConcurrentUpdate(Uuid),

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] DbError),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::NotFound(_) => AppError::NotFound(message),
            AppointmentError::SlotUnavailable(key) => AppError::conflict(
                "slot_unavailable",
                message,
                Some(json!({
                    "providerId": key.provider_id,
                    "date": key.date,
                    "slot": key.start,
                })),
            ),
            AppointmentError::DuplicateReview(appointment_id) => AppError::conflict(
                "duplicate_review",
                message,
                Some(json!({ "appointmentId": appointment_id })),
            ),
            AppointmentError::ConcurrentUpdate(appointment_id) => AppError::conflict(
                "conflict",
                message,
                Some(json!({ "appointmentId": appointment_id })),
            ),
            AppointmentError::InvalidTransition { .. } => AppError::InvalidTransition(message),
            AppointmentError::NotAuthorized(_) => AppError::Forbidden(message),
            AppointmentError::Validation(_) => AppError::ValidationError(message),
            AppointmentError::Store(DbError::Transient(_)) => {
                AppError::ServiceUnavailable("The appointment store is temporarily unavailable".to_string())
            }
            AppointmentError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}
