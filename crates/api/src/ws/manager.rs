use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use vitalwatch_events::sink::PushFrame;

/// Channel sender half feeding a connection's writer task.
///
/// Alert events reach the same writer through the connection's push sink.
pub type WsSender = mpsc::Sender<PushFrame>;

/// Tracks every open alert WebSocket for heartbeats and shutdown.
///
/// Alert routing itself goes through the subscriber registry; this manager
/// only needs to reach every connection at once.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsSender>>,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection's writer channel.
    pub async fn add(&self, conn_id: String, sender: WsSender) {
        self.connections.write().await.insert(conn_id, sender);
    }

    /// Remove a connection by its ID.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// server stops.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for sender in conns.values() {
            let _ = sender.try_send(PushFrame::Close);
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Queue a Ping frame on every connection.
    ///
    /// A connection whose writer is backed up skips this ping; it will
    /// either drain or be dropped by the next alert push that times out.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for sender in conns.values() {
            let _ = sender.try_send(PushFrame::Keepalive);
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
