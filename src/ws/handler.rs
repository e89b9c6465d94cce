use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws
/// WebSocket upgrade endpoint. Assigns a fresh connection id for the
/// socket's lifetime and spawns an actor for the connection.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let conn_id = Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connection accepted");
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, conn_id))
}
