use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, RETURN_REPRESENTATION};
use shared_database::DbError;

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, ListScope, Review, SlotKey};
use crate::services::store::AppointmentStore;

const APPOINTMENTS: &str = "/rest/v1/appointments";
const REVIEWS: &str = "/rest/v1/reviews";

/// PostgREST-backed store. Slot uniqueness comes from the partial unique index on
/// `(provider_id, appointment_date, start_time) where status <> 'cancelled'`.
pub struct SupabaseAppointmentStore {
    supabase: SupabaseClient,
}

#[derive(Deserialize)]
struct PatientRow {
    patient_id: Uuid,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    fn list_query(filter: &AppointmentFilter) -> String {
        let mut query_parts = vec![match filter.scope {
            ListScope::Patient(id) => format!("patient_id=eq.{}", id),
            ListScope::Provider(id) => format!("provider_id=eq.{}", id),
        }];

        if let Some(status) = filter.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from) = filter.date_from {
            query_parts.push(format!("appointment_date=gte.{}", from));
        }
        if let Some(to) = filter.date_to {
            query_parts.push(format!("appointment_date=lte.{}", to));
        }
        if let Some(search) = &filter.search {
            // Reserved PostgREST characters would break the or=() grammar.
            let term: String = search
                .chars()
                .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"'))
                .collect();
            let pattern = format!("*{}*", term);
            query_parts.push(format!(
                "or=(symptoms.ilike.{},notes.ilike.{})",
                urlencoding::encode(&pattern),
                urlencoding::encode(&pattern)
            ));
        }

        query_parts.push("order=appointment_date.desc,start_time.desc,created_at.desc".to_string());
        query_parts.push(format!("limit={}", filter.limit));
        query_parts.push(format!("offset={}", filter.offset()));

        query_parts.join("&")
    }

    async fn patch_one(&self, path: &str, body: serde_json::Value) -> Result<Option<Appointment>, DbError> {
        let rows: Vec<Appointment> = self
            .supabase
            .request_with_prefer(Method::PATCH, path, Some(body), RETURN_REPRESENTATION)
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, DbError> {
        debug!("Inserting appointment {}", appointment.id);

        let rows: Vec<Appointment> = self
            .supabase
            .request_with_prefer(Method::POST, APPOINTMENTS, Some(json!(appointment)), RETURN_REPRESENTATION)
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::Decode("Insert returned no rows".to_string()))
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, DbError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS, id);
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        target: AppointmentStatus,
    ) -> Result<Option<Appointment>, DbError> {
        let path = format!("{}?id=eq.{}&status=eq.{}", APPOINTMENTS, id, expected);
        self.patch_one(&path, json!({
            "status": target,
            "updated_at": Utc::now(),
        }))
        .await
    }

    async fn reschedule(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        from: SlotKey,
        to: SlotKey,
    ) -> Result<Option<Appointment>, DbError> {
        let path = format!(
            "{}?id=eq.{}&status=eq.{}&appointment_date=eq.{}&start_time=eq.{}",
            APPOINTMENTS, id, expected, from.date, from.start
        );
        self.patch_one(&path, json!({
            "appointment_date": to.date,
            "start_time": to.start,
            "status": AppointmentStatus::Requested,
            "updated_at": Utc::now(),
        }))
        .await
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<(Vec<Appointment>, u64), DbError> {
        let path = format!("{}?{}", APPOINTMENTS, Self::list_query(filter));
        let (rows, total): (Vec<Appointment>, _) = self.supabase.request_with_count(&path).await?;

        let total = total.unwrap_or(filter.offset() + rows.len() as u64);
        Ok((rows, total))
    }

    async fn active_appointments(&self) -> Result<Vec<Appointment>, DbError> {
        let path = format!("{}?status=neq.cancelled", APPOINTMENTS);
        self.supabase.request(Method::GET, &path, None).await
    }

    async fn patients_with_open_appointments(&self, provider_id: Uuid) -> Result<Vec<Uuid>, DbError> {
        let path = format!(
            "{}?provider_id=eq.{}&status=in.(requested,confirmed,in_progress)&select=patient_id",
            APPOINTMENTS, provider_id
        );
        let rows: Vec<PatientRow> = self.supabase.request(Method::GET, &path, None).await?;

        let patients: BTreeSet<Uuid> = rows.into_iter().map(|row| row.patient_id).collect();
        Ok(patients.into_iter().collect())
    }

    async fn insert_review(&self, review: Review) -> Result<Review, DbError> {
        let rows: Vec<Review> = self
            .supabase
            .request_with_prefer(Method::POST, REVIEWS, Some(json!(review)), RETURN_REPRESENTATION)
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::Decode("Insert returned no rows".to_string()))
    }

    async fn review_for_appointment(&self, appointment_id: Uuid) -> Result<Option<Review>, DbError> {
        let path = format!("{}?appointment_id=eq.{}", REVIEWS, appointment_id);
        let rows: Vec<Review> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn reviews_for_provider(&self, provider_id: Uuid) -> Result<Vec<Review>, DbError> {
        let path = format!("{}?provider_id=eq.{}&order=created_at.desc", REVIEWS, provider_id);
        self.supabase.request(Method::GET, &path, None).await
    }
}
