use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::{AvailabilityError, AvailabilityService};
use notification_cell::{AppointmentUpdateType, NotificationFanout, ServerEvent};
use shared_database::retry::retry_transient;
use shared_database::DbError;
use shared_models::auth::{Actor, Role};

use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, AppointmentPage, AppointmentQueryParams,
    AppointmentStatus, BookAppointmentRequest, ListScope, ProviderReviews, Review,
    SlotKey, SlotView, SubmitReviewRequest,
};
use crate::services::registry::{Reservation, SlotRegistry};
use crate::services::store::AppointmentStore;
use crate::services::workflow::StatusWorkflow;

pub struct SchedulingService {
    store: Arc<dyn AppointmentStore>,
    registry: Arc<SlotRegistry>,
    workflow: StatusWorkflow,
    availability: Arc<AvailabilityService>,
    fanout: NotificationFanout,
}

impl SchedulingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        registry: Arc<SlotRegistry>,
        availability: Arc<AvailabilityService>,
        fanout: NotificationFanout,
    ) -> Self {
        Self {
            store,
            registry,
            workflow: StatusWorkflow::new(),
            availability,
            fanout,
        }
    }

    pub fn registry(&self) -> &Arc<SlotRegistry> {
        &self.registry
    }

    /// Re-derives the reservation index from the store's active appointments.
    pub async fn rebuild_registry(&self) -> Result<usize, AppointmentError> {
        let active = retry_transient("load active appointments", || self.store.active_appointments()).await?;
        Ok(self.registry.rebuild(&active))
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    pub async fn book(&self, actor: Actor, request: BookAppointmentRequest) -> Result<Appointment, AppointmentError> {
        if actor.role != Role::Patient {
            return Err(AppointmentError::NotAuthorized("Only patients can book appointments".to_string()));
        }

        let key = SlotKey::new(request.provider_id, request.date, request.slot);
        let duration_minutes = self.validate_bookable(key).await?;

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: actor.user_id,
            provider_id: request.provider_id,
            appointment_date: request.date,
            start_time: request.slot,
            duration_minutes,
            status: AppointmentStatus::Requested,
            symptoms: clean_text(request.symptoms),
            notes: clean_text(request.notes),
            created_at: now,
            updated_at: now,
        };

        let reservation = self
            .reserve(key, appointment.id)
            .await
            .inspect_err(|_| warn!("Booking rejected, slot {} is taken", key))?;

        let stored = match retry_transient("insert appointment", || self.store.insert_appointment(appointment.clone())).await {
            Ok(stored) => stored,
            Err(DbError::Conflict(reason)) => match self.store.get_appointment(appointment.id).await {
                // A retried insert can collide with its own first attempt.
                Ok(Some(stored)) => stored,
                _ => {
                    warn!("Store rejected booking for slot {}: {}", key, reason);
                    return Err(AppointmentError::SlotUnavailable(key));
                }
            },
            Err(e) => return Err(e.into()),
        };
        reservation.commit();

        info!("Appointment {} booked for slot {}", stored.id, key);
        self.notify(stored.provider_id, AppointmentUpdateType::New, &stored).await;
        Ok(stored)
    }

    // ==========================================================================
    // STATUS UPDATES
    // ==========================================================================

    pub async fn update_status(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        target: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_as_party(actor, appointment_id).await?;
        self.workflow.validate(appointment.status, target, actor.role)?;

        let updated = self
            .compare_and_set(appointment_id, |stored| stored.status == target, || {
                self.store.update_status(appointment_id, appointment.status, target)
            })
            .await?;

        if !target.is_active() {
            // A reschedule may have moved the record between our read and the write.
            self.registry.release_for(updated.slot_key(), appointment_id);
            self.registry.release_for(appointment.slot_key(), appointment_id);
        }

        info!("Appointment {} moved {} -> {} by {}", appointment_id, appointment.status, target, actor.role);
        if let Some(counterpart) = updated.counterpart_of(actor.user_id) {
            self.notify(counterpart, AppointmentUpdateType::Status, &updated).await;
        }
        Ok(updated)
    }

    // ==========================================================================
    // RESCHEDULING
    // ==========================================================================

    /// Moves an appointment to a new slot. If anything fails the appointment keeps its
    /// original slot and the new slot stays free.
    pub async fn reschedule(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        date: NaiveDate,
        slot: NaiveTime,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_as_party(actor, appointment_id).await?;

        if !self.workflow.can_reschedule(appointment.status) {
            return Err(AppointmentError::InvalidTransition {
                from: appointment.status,
                to: AppointmentStatus::Requested,
            });
        }

        let old_key = appointment.slot_key();
        let new_key = SlotKey::new(appointment.provider_id, date, slot);
        if new_key == old_key {
            return Err(AppointmentError::Validation("Appointment is already booked for that slot".to_string()));
        }
        self.validate_bookable(new_key).await?;

        let reservation = self.reserve(new_key, appointment_id).await?;

        // Conditional on the slot as well as the status, so a concurrent move of the
        // same appointment makes this write match nothing.
        let moved = self
            .compare_and_set(
                appointment_id,
                |stored| stored.slot_key() == new_key && stored.status == AppointmentStatus::Requested,
                || self.store.reschedule(appointment_id, appointment.status, old_key, new_key),
            )
            .await
            .map_err(|e| match e {
                AppointmentError::Store(DbError::Conflict(_)) => AppointmentError::SlotUnavailable(new_key),
                other => other,
            })?;

        reservation.commit();
        self.registry.release_for(old_key, appointment_id);

        info!("Appointment {} rescheduled {} -> {}", appointment_id, old_key, new_key);
        if let Some(counterpart) = moved.counterpart_of(actor.user_id) {
            self.notify(counterpart, AppointmentUpdateType::Status, &moved).await;
        }
        Ok(moved)
    }

    // ==========================================================================
    // REVIEWS
    // ==========================================================================

    pub async fn submit_review(&self, actor: Actor, request: SubmitReviewRequest) -> Result<Review, AppointmentError> {
        if actor.role != Role::Patient {
            return Err(AppointmentError::NotAuthorized("Only patients can review appointments".to_string()));
        }
        if !(1..=5).contains(&request.rating) {
            return Err(AppointmentError::Validation("Rating must be between 1 and 5".to_string()));
        }
        let comment = request.comment.trim().to_string();
        if comment.is_empty() {
            return Err(AppointmentError::Validation("Comment is required".to_string()));
        }

        let appointment = self.load(request.appointment_id).await?;
        if appointment.patient_id != actor.user_id {
            return Err(AppointmentError::NotAuthorized("Only the patient on the appointment can review it".to_string()));
        }
        if appointment.status != AppointmentStatus::Completed {
            return Err(AppointmentError::Validation("Only completed appointments can be reviewed".to_string()));
        }

        let review = Review {
            id: Uuid::new_v4(),
            appointment_id: appointment.id,
            patient_id: appointment.patient_id,
            provider_id: appointment.provider_id,
            rating: request.rating as u8,
            comment,
            created_at: Utc::now(),
        };

        match retry_transient("insert review", || self.store.insert_review(review.clone())).await {
            Ok(stored) => {
                info!("Review {} recorded for appointment {}", stored.id, appointment.id);
                Ok(stored)
            }
            Err(DbError::Conflict(_)) => match self.store.review_for_appointment(appointment.id).await {
                Ok(Some(existing)) if existing.id == review.id => Ok(existing),
                _ => {
                    warn!("Duplicate review rejected for appointment {}", appointment.id);
                    Err(AppointmentError::DuplicateReview(appointment.id))
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    pub async fn provider_reviews(&self, provider_id: Uuid) -> Result<ProviderReviews, AppointmentError> {
        let reviews = retry_transient("load reviews", || self.store.reviews_for_provider(provider_id)).await?;
        Ok(ProviderReviews::new(provider_id, reviews))
    }

    // ==========================================================================
    // READ PATH
    // ==========================================================================

    pub async fn get_appointment(&self, actor: Actor, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.load_as_party(actor, appointment_id).await
    }

    pub async fn list_appointments(
        &self,
        actor: Actor,
        params: AppointmentQueryParams,
    ) -> Result<AppointmentPage, AppointmentError> {
        let scope = match actor.role {
            Role::Patient => ListScope::Patient(actor.user_id),
            Role::Provider => ListScope::Provider(actor.user_id),
        };
        let filter = AppointmentFilter::new(scope, params);

        let (items, total) = retry_transient("list appointments", || self.store.list_appointments(&filter)).await?;
        debug!("Listed {} of {} appointments for {}", items.len(), total, actor.user_id);
        Ok(AppointmentPage::new(items, total, &filter))
    }

    /// Template slots for the date with a non-authoritative availability hint.
    pub async fn available_slots(&self, provider_id: Uuid, date: NaiveDate) -> Result<Vec<SlotView>, AppointmentError> {
        let now = Utc::now().naive_utc();
        let slots = self.availability.slots_for(provider_id, date).await.map_err(availability_error)?;

        Ok(slots
            .into_iter()
            .map(|slot| {
                let key = SlotKey::new(provider_id, date, slot.start);
                SlotView {
                    start: slot.start,
                    end: slot.end,
                    available: date.and_time(slot.start) > now && self.registry.is_available(key),
                }
            })
            .collect())
    }

    /// Hint only; `book` may still return a conflict.
    pub async fn check_availability(&self, key: SlotKey) -> Result<bool, AppointmentError> {
        match self.validate_bookable(key).await {
            Ok(_) => Ok(self.registry.is_available(key)),
            Err(AppointmentError::Validation(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    /// Template and clock checks shared by booking and rescheduling. Returns the slot length.
    async fn validate_bookable(&self, key: SlotKey) -> Result<u32, AppointmentError> {
        let duration = self
            .availability
            .offered_slot(key.provider_id, key.date, key.start)
            .await
            .map_err(availability_error)?
            .ok_or_else(|| {
                AppointmentError::Validation("The requested slot is outside the provider's availability".to_string())
            })?;

        if key.date.and_time(key.start) <= Utc::now().naive_utc() {
            return Err(AppointmentError::Validation("The requested slot is in the past".to_string()));
        }

        Ok(duration)
    }

    /// Reserves `key` in the registry. A committed holder that the store no longer places
    /// on the slot (cancelled or moved by another instance) is released and the
    /// reservation is tried once more.
    async fn reserve(&self, key: SlotKey, appointment_id: Uuid) -> Result<Reservation, AppointmentError> {
        match self.registry.reserve(key, appointment_id) {
            Err(AppointmentError::SlotUnavailable(_)) => {}
            other => return other,
        }

        let Some(holder) = self.registry.committed_holder(key) else {
            return Err(AppointmentError::SlotUnavailable(key));
        };
        let current = retry_transient("load slot holder", || self.store.get_appointment(holder)).await?;
        let occupies = current.is_some_and(|a| a.status.is_active() && a.slot_key() == key);
        if occupies {
            return Err(AppointmentError::SlotUnavailable(key));
        }

        warn!("Registry entry for slot {} names appointment {} which no longer holds it", key, holder);
        self.registry.release_for(key, holder);
        self.registry.reserve(key, appointment_id)
    }

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        retry_transient("load appointment", || self.store.get_appointment(appointment_id))
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    async fn load_as_party(&self, actor: Actor, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self.load(appointment_id).await?;

        let is_party = match actor.role {
            Role::Patient => appointment.patient_id == actor.user_id,
            Role::Provider => appointment.provider_id == actor.user_id,
        };
        if !is_party {
            warn!("User {} is not a party to appointment {}", actor.user_id, appointment_id);
            return Err(AppointmentError::NotAuthorized("Not a party to this appointment".to_string()));
        }

        Ok(appointment)
    }

    /// Runs a compare-and-set write with one retry on transient failure. When nothing
    /// matched, the record is re-read: a retried write may already have landed.
    async fn compare_and_set<F, Fut>(
        &self,
        appointment_id: Uuid,
        already_applied: impl Fn(&Appointment) -> bool,
        write: F,
    ) -> Result<Appointment, AppointmentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Option<Appointment>, DbError>>,
    {
        if let Some(updated) = retry_transient("update appointment", write).await? {
            return Ok(updated);
        }

        match self.store.get_appointment(appointment_id).await? {
            Some(current) if already_applied(&current) => Ok(current),
            Some(_) => Err(AppointmentError::ConcurrentUpdate(appointment_id)),
            None => Err(AppointmentError::NotFound(appointment_id)),
        }
    }

    async fn notify(&self, user_id: Uuid, update_type: AppointmentUpdateType, appointment: &Appointment) {
        let event = ServerEvent::appointment(update_type, json!(appointment));
        self.fanout.publish(user_id, event).await;
    }
}

fn clean_text(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn availability_error(err: AvailabilityError) -> AppointmentError {
    match err {
        AvailabilityError::Store(e) => AppointmentError::Store(e),
        AvailabilityError::Validation(msg) | AvailabilityError::NotAuthorized(msg) => AppointmentError::Validation(msg),
    }
}
