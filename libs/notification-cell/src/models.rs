use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use shared_models::auth::Role;

use crate::FanoutError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentUpdateType {
    New,
    Status,
}

/// Server to client push messages. Serialized as `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    AppointmentUpdate {
        #[serde(rename = "type")]
        update_type: AppointmentUpdateType,
        appointment: Value,
    },
    #[serde(rename_all = "camelCase")]
    AvailabilityUpdate {
        provider_id: Uuid,
        availability: Value,
    },
    IntentAccepted {
        intent: String,
        result: Value,
    },
    IntentRejected {
        intent: String,
        kind: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn appointment(update_type: AppointmentUpdateType, appointment: Value) -> Self {
        ServerEvent::AppointmentUpdate { update_type, appointment }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::AppointmentUpdate { .. } => "appointmentUpdate",
            ServerEvent::AvailabilityUpdate { .. } => "availabilityUpdate",
            ServerEvent::IntentAccepted { .. } => "intentAccepted",
            ServerEvent::IntentRejected { .. } => "intentRejected",
        }
    }

    pub fn to_message(&self) -> Result<String, FanoutError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A live transport channel owned by the fanout registry.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: Uuid,
    /// Set when the connected user is a provider.
    pub provider_id: Option<Uuid>,
    pub connected_at: DateTime<Utc>,
    pub(crate) sender: mpsc::Sender<ServerEvent>,
}

impl Connection {
    pub fn new(user_id: Uuid, role: Role, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            provider_id: (role == Role::Provider).then_some(user_id),
            connected_at: Utc::now(),
            sender,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}
