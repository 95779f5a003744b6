//! Live-connection registry.
//!
//! Maps user ids to the send half of their currently connected WebSocket
//! transports. A user can hold several connections (tabs, devices); absent
//! users are simply skipped when pushing. There is no durable queue behind
//! this: a user without a live connection misses the event.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// A unique identifier for a registered connection.
pub type ConnectionId = u64;

/// Registry of live connections keyed by user id.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Vec<(ConnectionId, mpsc::UnboundedSender<String>)>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection's send half; returns its id for unregistering.
    pub fn register(&self, user_id: &str, sender: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut connections = self.connections.write().unwrap();
        connections
            .entry(user_id.to_string())
            .or_default()
            .push((id, sender));
        debug!("registered connection {} for {}", id, user_id);
        id
    }

    /// Drop a connection; the user entry disappears with its last one.
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) {
        let mut connections = self.connections.write().unwrap();
        if let Some(list) = connections.get_mut(user_id) {
            list.retain(|(id, _)| *id != connection_id);
            if list.is_empty() {
                connections.remove(user_id);
            }
        }
        debug!("unregistered connection {} for {}", connection_id, user_id);
    }

    /// Push a payload to every live connection of a user.
    ///
    /// Returns how many connections accepted it. A closed sender counts as a
    /// miss, never an error; the socket task cleans itself up.
    pub fn send_to(&self, user_id: &str, payload: &str) -> usize {
        let connections = self.connections.read().unwrap();
        let Some(list) = connections.get(user_id) else {
            return 0;
        };
        list.iter()
            .filter(|(_, sender)| sender.send(payload.to_string()).is_ok())
            .count()
    }

    /// Whether the user currently has any live connection.
    pub fn is_connected(&self, user_id: &str) -> bool {
        let connections = self.connections.read().unwrap();
        connections.contains_key(user_id)
    }

    /// Total number of live connections.
    pub fn connection_count(&self) -> usize {
        let connections = self.connections.read().unwrap();
        connections.values().map(Vec::len).sum()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
