use axum::{extract::State, Json, Router};

use crate::registry::RegistryStats;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (the whole protocol lives here)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Read-only HTTP surface for probes and quick inspection
    let stats_routes = Router::new().route("/api/stats", axum::routing::get(get_stats));
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(stats_routes)
        .merge(health)
        .with_state(state)
}

/// GET /api/stats — Current registry counts (clients, rooms).
async fn get_stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.registry.stats())
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
