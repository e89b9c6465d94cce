use std::sync::Arc;

use crate::registry::Registry;
use crate::ws::{new_connection_registry, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Presence registry: rooms, clients, and their membership relation
    pub registry: Arc<Registry>,
    /// Active WebSocket connections by connection id
    pub connections: ConnectionRegistry,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            connections: new_connection_registry(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
