use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use doctor_cell::AvailabilityAudience;
use shared_database::DbError;

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, Review, SlotKey};

/// Durable appointment and review records.
///
/// Writers rely on the store to reject a second active appointment for a slot and a
/// second review for an appointment (`DbError::Conflict`). Status updates are
/// compare-and-set on the expected current status, slot moves on the expected status
/// and slot; `Ok(None)` means nothing matched.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, DbError>;

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, DbError>;

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        target: AppointmentStatus,
    ) -> Result<Option<Appointment>, DbError>;

    /// Moves the appointment from `from` to `to` and resets it to `requested`.
    async fn reschedule(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        from: SlotKey,
        to: SlotKey,
    ) -> Result<Option<Appointment>, DbError>;

    /// One page of matches, newest slot first, plus the total match count.
    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<(Vec<Appointment>, u64), DbError>;

    async fn active_appointments(&self) -> Result<Vec<Appointment>, DbError>;

    async fn patients_with_open_appointments(&self, provider_id: Uuid) -> Result<Vec<Uuid>, DbError>;

    async fn insert_review(&self, review: Review) -> Result<Review, DbError>;

    async fn review_for_appointment(&self, appointment_id: Uuid) -> Result<Option<Review>, DbError>;

    async fn reviews_for_provider(&self, provider_id: Uuid) -> Result<Vec<Review>, DbError>;
}

/// Single-instance store. Each write locks only the records it touches.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: DashMap<Uuid, Appointment>,
    active_slots: DashMap<SlotKey, Uuid>,
    reviews: DashMap<Uuid, Review>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_conflict(key: SlotKey) -> DbError {
        DbError::Conflict(format!("Slot {} already has an active appointment", key))
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, DbError> {
        if self.appointments.contains_key(&appointment.id) {
            return Err(DbError::Conflict(format!("Appointment {} already exists", appointment.id)));
        }

        if appointment.status.is_active() {
            match self.active_slots.entry(appointment.slot_key()) {
                Entry::Vacant(entry) => {
                    entry.insert(appointment.id);
                }
                Entry::Occupied(_) => return Err(Self::slot_conflict(appointment.slot_key())),
            }
        }

        self.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, DbError> {
        Ok(self.appointments.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        target: AppointmentStatus,
    ) -> Result<Option<Appointment>, DbError> {
        let Some(mut appointment) = self.appointments.get_mut(&id) else {
            return Ok(None);
        };
        if appointment.status != expected {
            return Ok(None);
        }

        if !target.is_active() {
            self.active_slots.remove_if(&appointment.slot_key(), |_, holder| *holder == id);
        }
        appointment.status = target;
        appointment.updated_at = Utc::now();

        Ok(Some(appointment.clone()))
    }

    async fn reschedule(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        from: SlotKey,
        to: SlotKey,
    ) -> Result<Option<Appointment>, DbError> {
        let Some(mut appointment) = self.appointments.get_mut(&id) else {
            return Ok(None);
        };
        if appointment.status != expected || appointment.slot_key() != from {
            return Ok(None);
        }

        if to != from {
            match self.active_slots.entry(to) {
                Entry::Vacant(entry) => {
                    entry.insert(id);
                }
                Entry::Occupied(_) => return Err(Self::slot_conflict(to)),
            }
            self.active_slots.remove_if(&from, |_, holder| *holder == id);
        }

        appointment.appointment_date = to.date;
        appointment.start_time = to.start;
        appointment.status = AppointmentStatus::Requested;
        appointment.updated_at = Utc::now();

        Ok(Some(appointment.clone()))
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<(Vec<Appointment>, u64), DbError> {
        let mut matches: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        matches.sort_by(|a, b| {
            (b.appointment_date, b.start_time, b.created_at).cmp(&(a.appointment_date, a.start_time, a.created_at))
        });

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();

        Ok((page, total))
    }

    async fn active_appointments(&self) -> Result<Vec<Appointment>, DbError> {
        Ok(self
            .appointments
            .iter()
            .filter(|entry| entry.status.is_active())
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn patients_with_open_appointments(&self, provider_id: Uuid) -> Result<Vec<Uuid>, DbError> {
        let patients: BTreeSet<Uuid> = self
            .appointments
            .iter()
            .filter(|entry| entry.provider_id == provider_id && !entry.status.is_terminal())
            .map(|entry| entry.patient_id)
            .collect();

        Ok(patients.into_iter().collect())
    }

    async fn insert_review(&self, review: Review) -> Result<Review, DbError> {
        match self.reviews.entry(review.appointment_id) {
            Entry::Vacant(entry) => {
                entry.insert(review.clone());
                Ok(review)
            }
            Entry::Occupied(_) => Err(DbError::Conflict(format!(
                "Appointment {} already has a review",
                review.appointment_id
            ))),
        }
    }

    async fn review_for_appointment(&self, appointment_id: Uuid) -> Result<Option<Review>, DbError> {
        Ok(self.reviews.get(&appointment_id).map(|entry| entry.value().clone()))
    }

    async fn reviews_for_provider(&self, provider_id: Uuid) -> Result<Vec<Review>, DbError> {
        let mut reviews: Vec<Review> = self
            .reviews
            .iter()
            .filter(|entry| entry.provider_id == provider_id)
            .map(|entry| entry.value().clone())
            .collect();

        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }
}

/// Lets availability changes reach patients who hold open appointments with the provider.
pub struct StoreAudience(pub Arc<dyn AppointmentStore>);

#[async_trait]
impl AvailabilityAudience for StoreAudience {
    async fn patients_with_open_appointments(&self, provider_id: Uuid) -> Result<Vec<Uuid>, DbError> {
        self.0.patients_with_open_appointments(provider_id).await
    }
}
