use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::Role;

use crate::{Connection, ConnectionId, DeliveryReport, ServerEvent};

pub type EventReceiver = mpsc::Receiver<ServerEvent>;

const DEFAULT_BUFFER: usize = 64;

/// Live connections keyed by user id. A user may hold several connections at once.
///
/// Delivery is best effort: `publish` never waits on a connection. A full or closed
/// channel loses that event, and the client recovers by re-reading from the store.
pub struct NotificationFanout {
    connections: Arc<RwLock<HashMap<Uuid, HashMap<ConnectionId, Connection>>>>,
    buffer: usize,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Creates a bounded channel for a new transport and registers it.
    pub async fn connect(&self, user_id: Uuid, role: Role) -> (ConnectionId, EventReceiver) {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let connection = Connection::new(user_id, role, sender);
        let id = connection.id;

        self.join(user_id, connection).await;
        (id, receiver)
    }

    pub async fn join(&self, user_id: Uuid, connection: Connection) {
        let connection_id = connection.id;
        let mut connections = self.connections.write().await;
        connections
            .entry(user_id)
            .or_default()
            .insert(connection_id, connection);

        debug!("Connection {} joined for user {}", connection_id, user_id);
    }

    /// Idempotent. Returns whether the connection was registered.
    pub async fn leave(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;

        let Some(user_connections) = connections.get_mut(&user_id) else {
            return false;
        };

        let removed = user_connections.remove(&connection_id).is_some();
        if user_connections.is_empty() {
            connections.remove(&user_id);
        }

        if removed {
            debug!("Connection {} left for user {}", connection_id, user_id);
        }
        removed
    }

    pub async fn publish(&self, target_user_id: Uuid, event: ServerEvent) -> DeliveryReport {
        let connections = self.connections.read().await;
        let mut report = DeliveryReport::default();

        let Some(user_connections) = connections.get(&target_user_id) else {
            debug!("No live connections for user {}, {} not pushed", target_user_id, event.name());
            return report;
        };

        for connection in user_connections.values() {
            match connection.sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Connection {} for user {} is lagging, dropping {}",
                        connection.id, target_user_id, event.name()
                    );
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} for user {} already closed", connection.id, target_user_id);
                    report.dropped += 1;
                }
            }
        }

        debug!(
            "Published {} to user {}: {} delivered, {} dropped",
            event.name(), target_user_id, report.delivered, report.dropped
        );
        report
    }

    /// Publishes the same event to several users, skipping duplicates.
    pub async fn publish_many(&self, target_user_ids: &[Uuid], event: ServerEvent) -> DeliveryReport {
        let mut seen = Vec::with_capacity(target_user_ids.len());
        let mut total = DeliveryReport::default();

        for user_id in target_user_ids {
            if seen.contains(user_id) {
                continue;
            }
            seen.push(*user_id);

            let report = self.publish(*user_id, event.clone()).await;
            total.delivered += report.delivered;
            total.dropped += report.dropped;
        }

        total
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        let connections = self.connections.read().await;
        connections.get(&user_id).map(HashMap::len).unwrap_or(0)
    }

    pub async fn get_connected_users(&self) -> Vec<Uuid> {
        let connections = self.connections.read().await;
        connections.keys().cloned().collect()
    }
}

impl Default for NotificationFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for NotificationFanout {
    fn clone(&self) -> Self {
        Self {
            connections: Arc::clone(&self.connections),
            buffer: self.buffer,
        }
    }
}
