//! Unicast and fan-out send helpers.
//!
//! Events are serialized once and pushed into per-connection channels; the
//! per-connection writer tasks own the actual socket I/O. Sends to a
//! connection that has gone away are dropped silently.

use axum::extract::ws::Message;

use super::ConnectionRegistry;
use crate::registry::ConnectionId;
use crate::ws::protocol::ServerEvent;

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, event = event.event, "Failed to encode server event");
            None
        }
    }
}

/// Send an event to a single connection.
pub fn send_to_connection(registry: &ConnectionRegistry, conn_id: &str, event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };
    if let Some(sender) = registry.get(conn_id) {
        let _ = sender.send(msg);
    }
}

/// Fan an event out to a member snapshot, excluding at most one connection
/// (the sender, for events its originator should not receive back).
pub fn send_to_members(
    registry: &ConnectionRegistry,
    members: &[ConnectionId],
    except: Option<&str>,
    event: &ServerEvent,
) {
    let Some(msg) = encode(event) else { return };
    for id in members {
        if except.is_some_and(|excluded| excluded == id) {
            continue;
        }
        if let Some(sender) = registry.get(id) {
            let _ = sender.send(msg.clone());
        }
    }
}
