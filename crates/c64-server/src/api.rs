//! Admin/status HTTP endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use c64_feed::{RelayStatus, UpstreamRelay};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::registry::{SessionRegistry, SessionSummary};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub relay: UpstreamRelay,
    pub version: String,
    /// When the gateway started.
    pub start_time: Instant,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSummary {
    pub connected: bool,
    pub connecting: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

/// `GET /`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    /// Unix time in milliseconds.
    pub current_time: i64,
    /// Milliseconds since start.
    pub uptime: u64,
    pub clients: usize,
    pub messages: u64,
    pub version: String,
    pub pusher: FeedSummary,
}

/// `GET /api/clients`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientsResponse {
    pub status: &'static str,
    pub current_time: i64,
    pub clients_number: usize,
    pub clients: Vec<SessionSummary>,
}

/// Acknowledgement for the action endpoints.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct FeedStatusResponse {
    pub status: &'static str,
    pub pusher: RelayStatus,
}

/// Build the Axum router with all routes.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/api/clients", get(clients_handler))
        .route("/api/clients/reset", get(reset_clients_handler))
        .route("/api/pusher/status", get(feed_status_handler))
        .route("/api/pusher/reconnect", get(feed_reconnect_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

async fn status_handler(State(state): State<ApiState>) -> Json<StatusResponse> {
    let relay = state.relay.status();
    Json(StatusResponse {
        status: "ok",
        current_time: now_millis(),
        uptime: u64::try_from(state.start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        clients: state.registry.count(),
        messages: relay.message_count,
        version: state.version.clone(),
        pusher: FeedSummary {
            connected: relay.connected,
            connecting: relay.connecting,
            last_activity: relay.last_activity,
        },
    })
}

async fn clients_handler(State(state): State<ApiState>) -> Json<ClientsResponse> {
    let clients = state.registry.list();
    Json(ClientsResponse {
        status: "ok",
        current_time: now_millis(),
        clients_number: clients.len(),
        clients,
    })
}

async fn reset_clients_handler(State(state): State<ApiState>) -> Json<ActionResponse> {
    let count = state.registry.disconnect_all();
    tracing::info!(count, "disconnected all terminals");
    Json(ActionResponse {
        status: "ok",
        message: format!("{count} clients disconnected"),
    })
}

async fn feed_status_handler(State(state): State<ApiState>) -> Json<FeedStatusResponse> {
    Json(FeedStatusResponse {
        status: "ok",
        pusher: state.relay.status(),
    })
}

async fn feed_reconnect_handler(State(state): State<ApiState>) -> Json<ActionResponse> {
    let message = if state.relay.force_reconnect() {
        "Pusher reconnection initiated"
    } else {
        "Pusher already connected or connecting"
    };
    Json(ActionResponse {
        status: "ok",
        message: message.into(),
    })
}
