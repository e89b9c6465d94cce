//! JSON wire protocol for the WebSocket surface.
//!
//! Inbound frames carry a `method` tag plus arguments; outbound frames are
//! a flat envelope of event tag, optional author, optional room, and an
//! opaque data payload. Fields that do not apply to an event are omitted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::{ConnectionId, RegistryStats};

/// Inbound protocol event, tagged by `method`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum ClientEvent {
    Join {
        room: String,
    },
    Leave {
        room: String,
    },
    Broadcast {
        room: String,
        #[serde(default)]
        data: Value,
    },
    SetClientMetadata {
        data: Value,
    },
    SetRoomMetadata {
        room: String,
        data: Value,
    },
    GetUsers {
        room: String,
    },
    Ping,
    Stats,
}

const KNOWN_METHODS: &[&str] = &[
    "join",
    "leave",
    "broadcast",
    "set-client-metadata",
    "set-room-metadata",
    "get-users",
    "ping",
    "stats",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown method {0:?}")]
    UnknownMethod(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl ClientEvent {
    /// Parse one inbound text frame. Distinguishes an unrecognized method
    /// (a well-formed frame naming a method this server does not speak)
    /// from a frame that is malformed outright.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        match serde_json::from_value::<ClientEvent>(value) {
            Ok(event) => Ok(event),
            Err(e) => match method {
                Some(m) if !KNOWN_METHODS.contains(&m.as_str()) => {
                    Err(ProtocolError::UnknownMethod(m))
                }
                _ => Err(ProtocolError::Malformed(e.to_string())),
            },
        }
    }
}

/// Outbound protocol event. `author` is the connection the event is about,
/// `room` the room it concerns; both are omitted when inapplicable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<ConnectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerEvent {
    fn tagged(event: &'static str) -> Self {
        Self {
            event,
            author: None,
            room: None,
            data: None,
        }
    }

    /// Connection acknowledgment, telling the client its assigned id.
    pub fn welcome(conn_id: &str) -> Self {
        Self {
            author: Some(conn_id.to_string()),
            ..Self::tagged("welcome")
        }
    }

    /// Join acknowledgment to the joiner. Room metadata is sent explicitly,
    /// as `null` when the room has none yet.
    pub fn welcome_to_room(room: &str, metadata: Option<Value>) -> Self {
        Self {
            room: Some(room.to_string()),
            data: Some(metadata.unwrap_or(Value::Null)),
            ..Self::tagged("welcome-to-room")
        }
    }

    /// Arrival announcement to a room's other members.
    pub fn new_room_client(room: &str, author: &str, metadata: Option<Value>) -> Self {
        Self {
            author: Some(author.to_string()),
            room: Some(room.to_string()),
            data: Some(metadata.unwrap_or(Value::Null)),
            ..Self::tagged("new-room-client")
        }
    }

    /// Departure announcement, for both explicit leave and disconnect.
    pub fn client_left(room: &str, author: &str) -> Self {
        Self {
            author: Some(author.to_string()),
            room: Some(room.to_string()),
            ..Self::tagged("client-left")
        }
    }

    /// A member's message, forwarded verbatim and tagged with its sender.
    pub fn broadcast_from(room: &str, author: &str, data: Value) -> Self {
        Self {
            author: Some(author.to_string()),
            room: Some(room.to_string()),
            data: Some(data),
            ..Self::tagged("broadcast-from")
        }
    }

    pub fn client_metadata_update(author: &str, metadata: Value) -> Self {
        Self {
            author: Some(author.to_string()),
            data: Some(metadata),
            ..Self::tagged("client-metadata-update")
        }
    }

    pub fn room_metadata_update(room: &str, metadata: Value) -> Self {
        Self {
            room: Some(room.to_string()),
            data: Some(metadata),
            ..Self::tagged("room-metadata-update")
        }
    }

    /// Member listing for the requesting connection only.
    pub fn room_users(room: &str, users: &HashMap<ConnectionId, Option<Value>>) -> Self {
        let map: serde_json::Map<String, Value> = users
            .iter()
            .map(|(id, meta)| (id.clone(), meta.clone().unwrap_or(Value::Null)))
            .collect();
        Self {
            room: Some(room.to_string()),
            data: Some(Value::Object(map)),
            ..Self::tagged("room-users")
        }
    }

    pub fn pong() -> Self {
        Self::tagged("pong")
    }

    pub fn statistics(stats: RegistryStats) -> Self {
        Self {
            data: serde_json::to_value(stats).ok(),
            ..Self::tagged("statistics")
        }
    }

    /// Error notice to the originating connection only.
    pub fn error(message: &str) -> Self {
        Self {
            data: Some(Value::String(message.to_string())),
            ..Self::tagged("error")
        }
    }
}
