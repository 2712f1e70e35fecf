use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use notification_cell::{NotificationFanout, ServerEvent};
use shared_database::retry::retry_transient;
use shared_database::DbError;
use shared_models::auth::Actor;

use crate::models::{
    AvailabilityError, ProviderAvailability, SetAvailabilityRequest, TemplateSlot,
};
use crate::services::repository::AvailabilityRepository;

/// Resolves which users, besides the provider, should hear about a template change.
#[async_trait]
pub trait AvailabilityAudience: Send + Sync {
    async fn patients_with_open_appointments(&self, provider_id: Uuid) -> Result<Vec<Uuid>, DbError>;
}

pub struct AvailabilityService {
    repository: Arc<dyn AvailabilityRepository>,
    fanout: NotificationFanout,
    audience: Option<Arc<dyn AvailabilityAudience>>,
    default_slot_minutes: u32,
}

impl AvailabilityService {
    pub fn new(
        repository: Arc<dyn AvailabilityRepository>,
        fanout: NotificationFanout,
        default_slot_minutes: u32,
    ) -> Self {
        Self {
            repository,
            fanout,
            audience: None,
            default_slot_minutes,
        }
    }

    pub fn with_audience(mut self, audience: Arc<dyn AvailabilityAudience>) -> Self {
        self.audience = Some(audience);
        self
    }

    /// Returns the stored template, or an empty one if the provider never published any.
    pub async fn get_availability(&self, provider_id: Uuid) -> Result<ProviderAvailability, AvailabilityError> {
        let stored = retry_transient("load availability", || self.repository.get(provider_id)).await?;

        Ok(stored.unwrap_or_else(|| ProviderAvailability::empty(provider_id, self.default_slot_minutes)))
    }

    pub async fn set_availability(
        &self,
        actor: Actor,
        provider_id: Uuid,
        request: SetAvailabilityRequest,
    ) -> Result<ProviderAvailability, AvailabilityError> {
        if !actor.is_provider() || actor.user_id != provider_id {
            warn!("User {} tried to edit availability of provider {}", actor.user_id, provider_id);
            return Err(AvailabilityError::NotAuthorized(
                "Only the provider can edit their availability".to_string(),
            ));
        }

        let availability = ProviderAvailability {
            provider_id,
            slot_duration_minutes: request.slot_duration_minutes.unwrap_or(self.default_slot_minutes),
            days: request.days,
            updated_at: Utc::now(),
        }
        .normalized()?;

        let saved = retry_transient("save availability", || self.repository.upsert(availability.clone())).await?;
        info!("Availability updated for provider {}", provider_id);

        self.publish_update(&saved).await;
        Ok(saved)
    }

    /// Template slots for `date`, each with its end time.
    pub async fn slots_for(&self, provider_id: Uuid, date: NaiveDate) -> Result<Vec<TemplateSlot>, AvailabilityError> {
        let availability = self.get_availability(provider_id).await?;
        let step = Duration::minutes(i64::from(availability.slot_duration_minutes));

        Ok(availability
            .slots_for(date)
            .into_iter()
            .map(|start| TemplateSlot { start, end: start + step })
            .collect())
    }

    /// Whether `start` on `date` is a slot the provider's template offers, and the slot length.
    pub async fn offered_slot(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
    ) -> Result<Option<u32>, AvailabilityError> {
        let availability = self.get_availability(provider_id).await?;
        Ok(availability
            .offers(date, start)
            .then_some(availability.slot_duration_minutes))
    }

    async fn publish_update(&self, availability: &ProviderAvailability) {
        let mut targets = vec![availability.provider_id];

        if let Some(audience) = &self.audience {
            match audience.patients_with_open_appointments(availability.provider_id).await {
                Ok(patients) => targets.extend(patients),
                // The template is saved; only the push is narrowed.
                Err(e) => warn!(
                    "Could not resolve audience for provider {} availability update: {}",
                    availability.provider_id, e
                ),
            }
        }

        let event = ServerEvent::AvailabilityUpdate {
            provider_id: availability.provider_id,
            availability: json!(availability),
        };
        let report = self.fanout.publish_many(&targets, event).await;
        debug!(
            "availabilityUpdate for provider {} reached {} connections",
            availability.provider_id, report.delivered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DayWindows, TimeWindow};
    use crate::services::repository::InMemoryAvailabilityRepository;
    use assert_matches::assert_matches;
    use chrono::Weekday;

    struct FixedAudience(Vec<Uuid>);

    #[async_trait]
    impl AvailabilityAudience for FixedAudience {
        async fn patients_with_open_appointments(&self, _provider_id: Uuid) -> Result<Vec<Uuid>, DbError> {
            Ok(self.0.clone())
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday_morning() -> SetAvailabilityRequest {
        SetAvailabilityRequest {
            slot_duration_minutes: None,
            days: vec![DayWindows { day: Weekday::Mon, windows: vec![TimeWindow::new(t(9, 0), t(10, 0))] }],
        }
    }

    fn service(fanout: NotificationFanout) -> AvailabilityService {
        AvailabilityService::new(Arc::new(InMemoryAvailabilityRepository::new()), fanout, 30)
    }

    #[tokio::test]
    async fn test_unknown_provider_gets_empty_template() {
        let provider_id = Uuid::new_v4();
        let availability = service(NotificationFanout::new()).get_availability(provider_id).await.unwrap();

        assert_eq!(availability.provider_id, provider_id);
        assert!(availability.days.is_empty());
        assert_eq!(availability.slot_duration_minutes, 30);
    }

    #[tokio::test]
    async fn test_only_owner_may_edit() {
        let service = service(NotificationFanout::new());
        let provider_id = Uuid::new_v4();

        let other_provider = service.set_availability(Actor::provider(Uuid::new_v4()), provider_id, monday_morning()).await;
        assert_matches!(other_provider, Err(AvailabilityError::NotAuthorized(_)));

        let patient = service.set_availability(Actor::patient(provider_id), provider_id, monday_morning()).await;
        assert_matches!(patient, Err(AvailabilityError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_update_is_pushed_to_provider_and_audience_only() {
        let fanout = NotificationFanout::new();
        let provider_id = Uuid::new_v4();
        let patient_id = Uuid::new_v4();
        let bystander_id = Uuid::new_v4();

        let service = service(fanout.clone()).with_audience(Arc::new(FixedAudience(vec![patient_id])));
        let (_p, mut provider_rx) = fanout.connect(provider_id, shared_models::auth::Role::Provider).await;
        let (_q, mut patient_rx) = fanout.connect(patient_id, shared_models::auth::Role::Patient).await;
        let (_r, mut bystander_rx) = fanout.connect(bystander_id, shared_models::auth::Role::Patient).await;

        service
            .set_availability(Actor::provider(provider_id), provider_id, monday_morning())
            .await
            .unwrap();

        assert_matches!(provider_rx.try_recv(), Ok(ServerEvent::AvailabilityUpdate { .. }));
        assert_matches!(patient_rx.try_recv(), Ok(ServerEvent::AvailabilityUpdate { .. }));
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slots_follow_saved_template() {
        let service = service(NotificationFanout::new());
        let provider_id = Uuid::new_v4();
        service
            .set_availability(Actor::provider(provider_id), provider_id, monday_morning())
            .await
            .unwrap();

        let monday = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        let slots = service.slots_for(provider_id, monday).await.unwrap();
        assert_eq!(slots, vec![
            TemplateSlot { start: t(9, 0), end: t(9, 30) },
            TemplateSlot { start: t(9, 30), end: t(10, 0) },
        ]);

        assert_eq!(service.offered_slot(provider_id, monday, t(9, 30)).await.unwrap(), Some(30));
        assert_eq!(service.offered_slot(provider_id, monday, t(10, 0)).await.unwrap(), None);
    }
}
