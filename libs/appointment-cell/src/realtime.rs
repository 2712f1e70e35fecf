use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use chrono::{NaiveDate, NaiveTime};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::{AvailabilityService, SetAvailabilityRequest};
use notification_cell::{FanoutError, NotificationFanout, ServerEvent};
use shared_config::AppConfig;
use shared_models::auth::Actor;
use shared_models::error::AppError;
use shared_utils::extractor::{authenticate, bearer_token};

use crate::models::{AppointmentStatus, BookAppointmentRequest};
use crate::services::SchedulingService;

const REPLY_BUFFER: usize = 16;

#[derive(Clone)]
pub struct RealtimeState {
    pub config: Arc<AppConfig>,
    pub scheduling: Arc<SchedulingService>,
    pub availability: Arc<AvailabilityService>,
    pub fanout: NotificationFanout,
}

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Client to server messages, `{"intent": "...", "data": {...}}`. Each mirrors a REST call.
#[derive(Debug, Deserialize)]
#[serde(tag = "intent", content = "data", rename_all = "camelCase")]
pub enum ClientIntent {
    RequestAppointment(BookAppointmentRequest),
    UpdateAppointmentStatus {
        #[serde(alias = "appointmentId")]
        appointment_id: Uuid,
        #[serde(alias = "targetStatus", alias = "status")]
        target_status: AppointmentStatus,
    },
    RescheduleAppointment {
        #[serde(alias = "appointmentId")]
        appointment_id: Uuid,
        date: NaiveDate,
        slot: NaiveTime,
    },
    UpdateAvailability(SetAvailabilityRequest),
}

impl ClientIntent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientIntent::RequestAppointment(_) => "requestAppointment",
            ClientIntent::UpdateAppointmentStatus { .. } => "updateAppointmentStatus",
            ClientIntent::RescheduleAppointment { .. } => "rescheduleAppointment",
            ClientIntent::UpdateAvailability(_) => "updateAvailability",
        }
    }
}

pub fn realtime_routes(state: RealtimeState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Authenticates before upgrading. Browsers cannot set headers on a WebSocket
/// handshake, so the token may also come as `?token=`.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<RealtimeState>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = match bearer_token(&headers) {
        Ok(token) => token.to_string(),
        Err(header_error) => query.token.ok_or(header_error)?,
    };
    let (_, actor) = authenticate(&token, &state.config)?;

    info!("Realtime connection accepted for {} {}", actor.role, actor.user_id);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor)))
}

/// Forwards fanout events and intent replies to the socket, and dispatches incoming
/// intents until the client goes away.
async fn handle_socket(socket: WebSocket, state: RealtimeState, actor: Actor) {
    let (mut sink, mut stream) = socket.split();
    let (connection_id, mut events) = state.fanout.connect(actor.user_id, actor.role).await;
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerEvent>(REPLY_BUFFER);

    let sender = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = events.recv() => event,
                Some(reply) = reply_rx.recv() => reply,
                else => break,
            };

            let text = match event.to_message() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping unserializable {} event: {}", event.name(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let reply = dispatch_intent(&state, actor, text.as_str()).await;
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.fanout.leave(actor.user_id, connection_id).await;
    drop(reply_tx);
    sender.abort();
    debug!("Realtime connection {} closed for {}", connection_id, actor.user_id);
}

/// Runs one client intent with the socket's actor and builds the reply for that socket.
pub async fn dispatch_intent(state: &RealtimeState, actor: Actor, raw: &str) -> ServerEvent {
    let intent: ClientIntent = match serde_json::from_str(raw) {
        Ok(intent) => intent,
        Err(e) => {
            let error = FanoutError::MalformedMessage(e.to_string());
            return ServerEvent::IntentRejected {
                intent: intent_name_hint(raw),
                kind: "validation_error".to_string(),
                message: error.to_string(),
            };
        }
    };

    let name = intent.name();
    let outcome: Result<Value, AppError> = match intent {
        ClientIntent::RequestAppointment(request) => state
            .scheduling
            .book(actor, request)
            .await
            .map(|appointment| json!(appointment))
            .map_err(AppError::from),
        ClientIntent::UpdateAppointmentStatus { appointment_id, target_status } => state
            .scheduling
            .update_status(actor, appointment_id, target_status)
            .await
            .map(|appointment| json!(appointment))
            .map_err(AppError::from),
        ClientIntent::RescheduleAppointment { appointment_id, date, slot } => state
            .scheduling
            .reschedule(actor, appointment_id, date, slot)
            .await
            .map(|appointment| json!(appointment))
            .map_err(AppError::from),
        ClientIntent::UpdateAvailability(request) => state
            .availability
            .set_availability(actor, actor.user_id, request)
            .await
            .map(|availability| json!(availability))
            .map_err(AppError::from),
    };

    match outcome {
        Ok(result) => ServerEvent::IntentAccepted { intent: name.to_string(), result },
        Err(e) => {
            debug!("Intent {} from {} rejected: {}", name, actor.user_id, e);
            ServerEvent::IntentRejected {
                intent: name.to_string(),
                kind: e.kind().to_string(),
                message: e.message().to_string(),
            }
        }
    }
}

fn intent_name_hint(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("intent").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}
