//! In-memory presence registry: rooms, clients, and their membership relation.
//!
//! The registry is the only shared mutable structure in the server. Every
//! operation takes the single registry lock, mutates both sides of the
//! membership relation, and returns a detached snapshot for the caller to
//! act on after the lock is released. Invariant: a room name appears in a
//! client's room set exactly when the client's id appears in that room's
//! member set.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Stable identifier for one live connection, assigned at upgrade time.
pub type ConnectionId = String;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid room name: name must be non-empty")]
    InvalidName,
    #[error("no such client {0:?}")]
    UnknownClient(ConnectionId),
    #[error("client {id:?} is not a member of room {room:?}")]
    NotMember { id: ConnectionId, room: String },
}

#[derive(Debug, Default)]
struct ClientRecord {
    /// Opaque, client-supplied. Absent until the first set.
    metadata: Option<Value>,
    rooms: HashSet<String>,
}

#[derive(Debug, Default)]
struct RoomRecord {
    /// Opaque, shared by all members, replaced wholesale on set.
    metadata: Option<Value>,
    members: HashSet<ConnectionId>,
}

/// A room's state at the time of an operation. Detached from the live
/// registry: later mutations are not visible through it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub name: String,
    pub metadata: Option<Value>,
    pub members: Vec<ConnectionId>,
}

impl RoomSnapshot {
    fn capture(name: &str, room: &RoomRecord) -> Self {
        Self {
            name: name.to_string(),
            metadata: room.metadata.clone(),
            members: room.members.iter().cloned().collect(),
        }
    }
}

/// Everything a caller needs to announce a join without re-locking.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    /// The joined room, members including the joiner.
    pub room: RoomSnapshot,
    /// The joiner's current metadata, for the arrival announcement.
    pub client_metadata: Option<Value>,
    /// True when the client was already a member (idempotent re-join).
    pub already_member: bool,
}

/// Current registry counts, served over the `stats` protocol method and
/// `GET /api/stats`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegistryStats {
    pub clients: usize,
    pub rooms: usize,
}

#[derive(Debug, Default)]
struct RegistryInner {
    clients: HashMap<ConnectionId, ClientRecord>,
    rooms: HashMap<String, RoomRecord>,
}

/// The presence registry. A single lock guards both maps; the membership
/// invariant spans them, so every operation runs in one critical section.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A poisoned guard still holds consistent state; recover it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ensure a client record exists for this connection id. Idempotent.
    pub fn get_or_create_client(&self, id: &str) {
        let mut inner = self.lock();
        inner.clients.entry(id.to_string()).or_default();
    }

    /// Look up or lazily create a room. Fails on an empty name.
    pub fn get_or_create_room(&self, name: &str) -> Result<RoomSnapshot, RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName);
        }
        let mut inner = self.lock();
        let room = inner.rooms.entry(name.to_string()).or_default();
        Ok(RoomSnapshot::capture(name, room))
    }

    /// Add a client to a room, updating both sides of the relation under
    /// one critical section. Re-joining a room the client already belongs
    /// to is a no-op success, reported via `already_member`.
    pub fn join(&self, id: &str, room_name: &str) -> Result<JoinOutcome, RegistryError> {
        if room_name.is_empty() {
            return Err(RegistryError::InvalidName);
        }
        let mut guard = self.lock();
        let inner = &mut *guard;
        let client = inner
            .clients
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownClient(id.to_string()))?;
        let room = inner.rooms.entry(room_name.to_string()).or_default();

        let already_member = !client.rooms.insert(room_name.to_string());
        room.members.insert(id.to_string());

        Ok(JoinOutcome {
            room: RoomSnapshot::capture(room_name, room),
            client_metadata: client.metadata.clone(),
            already_member,
        })
    }

    /// Remove a client from a room. Returns the remaining members so the
    /// caller can announce the departure. The room persists even when it
    /// becomes empty.
    pub fn leave(&self, id: &str, room_name: &str) -> Result<Vec<ConnectionId>, RegistryError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let client = inner.clients.get_mut(id).ok_or_else(|| RegistryError::NotMember {
            id: id.to_string(),
            room: room_name.to_string(),
        })?;
        if !client.rooms.remove(room_name) {
            return Err(RegistryError::NotMember {
                id: id.to_string(),
                room: room_name.to_string(),
            });
        }
        let remaining = match inner.rooms.get_mut(room_name) {
            Some(room) => {
                room.members.remove(id);
                room.members.iter().cloned().collect()
            }
            None => Vec::new(),
        };
        Ok(remaining)
    }

    /// Remove a client entirely: leave every joined room first, then drop
    /// the client record. Returns the affected rooms with their remaining
    /// members for departure announcements. A second call for the same id
    /// fails with `UnknownClient` and mutates nothing.
    pub fn remove_client(&self, id: &str) -> Result<Vec<RoomSnapshot>, RegistryError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let room_names: Vec<String> = inner
            .clients
            .get(id)
            .ok_or_else(|| RegistryError::UnknownClient(id.to_string()))?
            .rooms
            .iter()
            .cloned()
            .collect();

        let mut affected = Vec::with_capacity(room_names.len());
        for name in &room_names {
            if let Some(client) = inner.clients.get_mut(id) {
                client.rooms.remove(name);
            }
            if let Some(room) = inner.rooms.get_mut(name) {
                room.members.remove(id);
                affected.push(RoomSnapshot::capture(name, room));
            }
        }
        inner.clients.remove(id);
        Ok(affected)
    }

    /// Replace a client's metadata wholesale. Returns the rooms the client
    /// belongs to (with members) so the caller can announce the change.
    pub fn set_client_metadata(
        &self,
        id: &str,
        value: Value,
    ) -> Result<Vec<RoomSnapshot>, RegistryError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let client = inner
            .clients
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownClient(id.to_string()))?;
        client.metadata = Some(value);
        let room_names: Vec<String> = client.rooms.iter().cloned().collect();
        Ok(room_names
            .into_iter()
            .filter_map(|name| {
                inner
                    .rooms
                    .get(&name)
                    .map(|room| RoomSnapshot::capture(&name, room))
            })
            .collect())
    }

    /// Replace a room's metadata wholesale, lazily creating the room. No
    /// membership check: any client may set any room's metadata.
    pub fn set_room_metadata(
        &self,
        name: &str,
        value: Value,
    ) -> Result<RoomSnapshot, RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName);
        }
        let mut inner = self.lock();
        let room = inner.rooms.entry(name.to_string()).or_default();
        room.metadata = Some(value);
        Ok(RoomSnapshot::capture(name, room))
    }

    /// Snapshot a room's members as connection id → metadata. Lazily
    /// creates the room for non-empty names; an empty name yields an empty
    /// map without creating anything.
    pub fn list_members(&self, name: &str) -> HashMap<ConnectionId, Option<Value>> {
        if name.is_empty() {
            return HashMap::new();
        }
        let mut guard = self.lock();
        let inner = &mut *guard;
        let room = inner.rooms.entry(name.to_string()).or_default();
        room.members
            .iter()
            .map(|id| {
                let metadata = inner.clients.get(id).and_then(|c| c.metadata.clone());
                (id.clone(), metadata)
            })
            .collect()
    }

    /// Current client and room counts.
    pub fn stats(&self) -> RegistryStats {
        let inner = self.lock();
        RegistryStats {
            clients: inner.clients.len(),
            rooms: inner.rooms.len(),
        }
    }
}
