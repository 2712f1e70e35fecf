use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_database::DbError;

use crate::models::ProviderAvailability;

const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=representation";

#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    async fn get(&self, provider_id: Uuid) -> Result<Option<ProviderAvailability>, DbError>;

    /// Replaces the provider's whole template.
    async fn upsert(&self, availability: ProviderAvailability) -> Result<ProviderAvailability, DbError>;
}

#[derive(Default)]
pub struct InMemoryAvailabilityRepository {
    templates: RwLock<HashMap<Uuid, ProviderAvailability>>,
}

impl InMemoryAvailabilityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityRepository for InMemoryAvailabilityRepository {
    async fn get(&self, provider_id: Uuid) -> Result<Option<ProviderAvailability>, DbError> {
        Ok(self.templates.read().await.get(&provider_id).cloned())
    }

    async fn upsert(&self, availability: ProviderAvailability) -> Result<ProviderAvailability, DbError> {
        self.templates
            .write()
            .await
            .insert(availability.provider_id, availability.clone());
        Ok(availability)
    }
}

pub struct SupabaseAvailabilityRepository {
    supabase: SupabaseClient,
}

impl SupabaseAvailabilityRepository {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }
}

#[async_trait]
impl AvailabilityRepository for SupabaseAvailabilityRepository {
    async fn get(&self, provider_id: Uuid) -> Result<Option<ProviderAvailability>, DbError> {
        let path = format!("/rest/v1/provider_availability?provider_id=eq.{}", provider_id);
        let rows: Vec<ProviderAvailability> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert(&self, availability: ProviderAvailability) -> Result<ProviderAvailability, DbError> {
        debug!("Upserting availability template for provider {}", availability.provider_id);

        let rows: Vec<ProviderAvailability> = self
            .supabase
            .request_with_prefer(
                Method::POST,
                "/rest/v1/provider_availability?on_conflict=provider_id",
                Some(json!(availability)),
                UPSERT_PREFER,
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::Decode("Upsert returned no rows".to_string()))
    }
}
