pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::registry::ConnectionId;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Connection registry: the outbound send primitive, one sender per live
/// connection, keyed by connection id.
/// Arc<DashMap<ConnectionId, ConnectionSender>>
pub type ConnectionRegistry = Arc<DashMap<ConnectionId, ConnectionSender>>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
