use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DbError;
use shared_models::error::AppError;

pub const MIN_SLOT_MINUTES: u32 = 5;
pub const MAX_SLOT_MINUTES: u32 = 240;

// ==============================================================================
// WEEKLY TEMPLATE
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayWindows {
    pub day: Weekday,
    pub windows: Vec<TimeWindow>,
}

/// A provider's recurring weekly template. Bookings never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderAvailability {
    pub provider_id: Uuid,
    pub slot_duration_minutes: u32,
    pub days: Vec<DayWindows>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderAvailability {
    pub fn empty(provider_id: Uuid, slot_duration_minutes: u32) -> Self {
        Self {
            provider_id,
            slot_duration_minutes,
            days: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Validates the template and puts days and windows in order.
    pub fn normalized(mut self) -> Result<Self, AvailabilityError> {
        if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&self.slot_duration_minutes) {
            return Err(AvailabilityError::Validation(format!(
                "Slot duration must be between {} and {} minutes",
                MIN_SLOT_MINUTES, MAX_SLOT_MINUTES
            )));
        }

        self.days.sort_by_key(|d| d.day.num_days_from_monday());
        for pair in self.days.windows(2) {
            if pair[0].day == pair[1].day {
                return Err(AvailabilityError::Validation(format!(
                    "Day {} is listed more than once",
                    pair[0].day
                )));
            }
        }

        for day in &mut self.days {
            if let Some(window) = day.windows.iter().find(|w| w.start >= w.end) {
                return Err(AvailabilityError::Validation(format!(
                    "Window {}-{} on {}: start time must be before end time",
                    window.start, window.end, day.day
                )));
            }

            day.windows.sort_by_key(|w| w.start);
            for pair in day.windows.windows(2) {
                if pair[0].overlaps(&pair[1]) {
                    return Err(AvailabilityError::Validation(format!(
                        "Windows {}-{} and {}-{} on {} overlap",
                        pair[0].start, pair[0].end, pair[1].start, pair[1].end, day.day
                    )));
                }
            }
        }

        self.days.retain(|d| !d.windows.is_empty());
        Ok(self)
    }

    pub fn windows_for(&self, day: Weekday) -> &[TimeWindow] {
        self.days
            .iter()
            .find(|d| d.day == day)
            .map(|d| d.windows.as_slice())
            .unwrap_or(&[])
    }

    /// Slot start times the template offers on `date`. Partial slots at the end of a window are skipped.
    pub fn slots_for(&self, date: NaiveDate) -> Vec<NaiveTime> {
        let step = Duration::minutes(i64::from(self.slot_duration_minutes));
        if step <= Duration::zero() {
            return Vec::new();
        }

        let mut slots = Vec::new();
        for window in self.windows_for(date.weekday()) {
            let mut start = window.start;
            loop {
                let (end, wrapped) = start.overflowing_add_signed(step);
                if wrapped != 0 || end > window.end {
                    break;
                }
                slots.push(start);
                start = end;
            }
        }
        slots
    }

    pub fn offers(&self, date: NaiveDate, start: NaiveTime) -> bool {
        self.slots_for(date).contains(&start)
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SetAvailabilityRequest {
    pub slot_duration_minutes: Option<u32>,
    pub days: Vec<DayWindows>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TemplateSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotAuthorized(String),

    #[error(transparent)]
    Store(#[from] DbError),
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Validation(msg) => AppError::ValidationError(msg),
            AvailabilityError::NotAuthorized(msg) => AppError::Forbidden(msg),
            AvailabilityError::Store(DbError::Transient(msg)) => AppError::ServiceUnavailable(msg),
            AvailabilityError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}
