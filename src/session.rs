//! Per-connection protocol dispatch.
//!
//! One `Session` per connection bridges transport events to registry
//! operations. Registry calls snapshot everything needed under the
//! registry lock; outbound sends go through the connection registry's
//! channels afterwards, so no I/O ever happens while the lock is held.
//! The transport delivers one event at a time per connection, so `Session`
//! methods are never re-entered concurrently.

use std::sync::Arc;

use serde_json::Value;

use crate::registry::{ConnectionId, Registry, RegistryError};
use crate::ws::broadcast::{send_to_connection, send_to_members};
use crate::ws::protocol::{ClientEvent, ProtocolError, ServerEvent};
use crate::ws::ConnectionRegistry;

/// Connection lifecycle phase. Events are only processed while `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Active,
    Disconnecting,
    Closed,
}

pub struct Session {
    conn_id: ConnectionId,
    phase: SessionPhase,
    registry: Arc<Registry>,
    connections: ConnectionRegistry,
}

impl Session {
    pub fn new(
        conn_id: ConnectionId,
        registry: Arc<Registry>,
        connections: ConnectionRegistry,
    ) -> Self {
        Self {
            conn_id,
            phase: SessionPhase::Connecting,
            registry,
            connections,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Connection established: register the client and acknowledge.
    pub fn on_connect(&mut self) {
        if self.phase != SessionPhase::Connecting {
            tracing::debug!(conn_id = %self.conn_id, phase = ?self.phase, "Ignoring duplicate connect");
            return;
        }
        self.registry.get_or_create_client(&self.conn_id);
        self.phase = SessionPhase::Active;
        self.send_to_self(&ServerEvent::welcome(&self.conn_id));
    }

    /// One inbound text frame. Parse failures and registry failures turn
    /// into error notices to this connection only; nothing here can
    /// terminate the connection or touch other connections' state.
    pub fn on_event(&self, raw: &str) {
        if self.phase != SessionPhase::Active {
            tracing::debug!(conn_id = %self.conn_id, phase = ?self.phase, "Dropping event outside Active phase");
            return;
        }
        match ClientEvent::parse(raw) {
            Ok(event) => self.dispatch(event),
            Err(ProtocolError::UnknownMethod(method)) => {
                tracing::warn!(conn_id = %self.conn_id, method = %method, "Unknown method");
                self.send_to_self(&ServerEvent::error("unknown-method"));
            }
            Err(ProtocolError::Malformed(detail)) => {
                tracing::warn!(conn_id = %self.conn_id, detail = %detail, "Malformed message");
                self.send_to_self(&ServerEvent::error("malformed-message"));
            }
        }
    }

    /// Connection teardown. Announces the departure to every room the
    /// client was in, then removes the client record. A duplicate
    /// disconnect finds the client already gone and does nothing further.
    pub fn on_disconnect(&mut self) {
        if matches!(self.phase, SessionPhase::Disconnecting | SessionPhase::Closed) {
            return;
        }
        self.phase = SessionPhase::Disconnecting;

        match self.registry.remove_client(&self.conn_id) {
            Ok(rooms) => {
                for room in &rooms {
                    // The departing connection is already gone; members in
                    // the snapshot are exactly the remaining ones.
                    send_to_members(
                        &self.connections,
                        &room.members,
                        None,
                        &ServerEvent::client_left(&room.name, &self.conn_id),
                    );
                }
                tracing::info!(conn_id = %self.conn_id, rooms = rooms.len(), "Client removed");
            }
            Err(RegistryError::UnknownClient(_)) => {
                tracing::debug!(conn_id = %self.conn_id, "Duplicate disconnect, client already removed");
            }
            Err(e) => {
                tracing::error!(conn_id = %self.conn_id, error = %e, "Disconnect cleanup failed");
            }
        }
        self.phase = SessionPhase::Closed;
    }

    fn dispatch(&self, event: ClientEvent) {
        tracing::debug!(conn_id = %self.conn_id, event = ?event, "Dispatching event");
        match event {
            ClientEvent::Join { room } => self.handle_join(&room),
            ClientEvent::Leave { room } => self.handle_leave(&room),
            ClientEvent::Broadcast { room, data } => self.handle_broadcast(&room, data),
            ClientEvent::SetClientMetadata { data } => self.handle_set_client_metadata(data),
            ClientEvent::SetRoomMetadata { room, data } => {
                self.handle_set_room_metadata(&room, data)
            }
            ClientEvent::GetUsers { room } => self.handle_get_users(&room),
            ClientEvent::Ping => self.send_to_self(&ServerEvent::pong()),
            ClientEvent::Stats => {
                self.send_to_self(&ServerEvent::statistics(self.registry.stats()))
            }
        }
    }

    fn handle_join(&self, room: &str) {
        match self.registry.join(&self.conn_id, room) {
            Ok(outcome) => {
                self.send_to_self(&ServerEvent::welcome_to_room(
                    room,
                    outcome.room.metadata.clone(),
                ));
                // A re-join is acknowledged but not re-announced: the other
                // members already saw this client arrive.
                if !outcome.already_member {
                    send_to_members(
                        &self.connections,
                        &outcome.room.members,
                        Some(&self.conn_id),
                        &ServerEvent::new_room_client(room, &self.conn_id, outcome.client_metadata),
                    );
                }
            }
            Err(e) => self.send_registry_error(&e),
        }
    }

    fn handle_leave(&self, room: &str) {
        match self.registry.leave(&self.conn_id, room) {
            Ok(remaining) => {
                send_to_members(
                    &self.connections,
                    &remaining,
                    None,
                    &ServerEvent::client_left(room, &self.conn_id),
                );
            }
            Err(e) => self.send_registry_error(&e),
        }
    }

    /// Pure fan-out: no registry mutation and no membership check on the
    /// sender. The sender's own connection is excluded from delivery.
    fn handle_broadcast(&self, room: &str, data: Value) {
        let members: Vec<ConnectionId> = self.registry.list_members(room).into_keys().collect();
        send_to_members(
            &self.connections,
            &members,
            Some(&self.conn_id),
            &ServerEvent::broadcast_from(room, &self.conn_id, data),
        );
    }

    fn handle_set_client_metadata(&self, data: Value) {
        match self.registry.set_client_metadata(&self.conn_id, data.clone()) {
            Ok(rooms) => {
                let event = ServerEvent::client_metadata_update(&self.conn_id, data);
                for room in &rooms {
                    send_to_members(&self.connections, &room.members, Some(&self.conn_id), &event);
                }
            }
            Err(e) => self.send_registry_error(&e),
        }
    }

    fn handle_set_room_metadata(&self, room: &str, data: Value) {
        match self.registry.set_room_metadata(room, data.clone()) {
            Ok(snapshot) => {
                // Every member sees the update, the setter included: the
                // room's metadata view stays consistent for all of them.
                send_to_members(
                    &self.connections,
                    &snapshot.members,
                    None,
                    &ServerEvent::room_metadata_update(room, data),
                );
            }
            Err(e) => self.send_registry_error(&e),
        }
    }

    fn handle_get_users(&self, room: &str) {
        let users = self.registry.list_members(room);
        self.send_to_self(&ServerEvent::room_users(room, &users));
    }

    fn send_to_self(&self, event: &ServerEvent) {
        send_to_connection(&self.connections, &self.conn_id, event);
    }

    fn send_registry_error(&self, error: &RegistryError) {
        tracing::warn!(conn_id = %self.conn_id, error = %error, "Registry operation failed");
        self.send_to_self(&ServerEvent::error(&error.to_string()));
    }
}
