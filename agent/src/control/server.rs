//! HTTP control surface
//!
//! Thin axum layer over [`commands`](super::commands): every route parses
//! its request, calls the host and maps the outcome onto a status code.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use flow_engine::{EngineMeta, ProjectDefinition};
use tower_http::cors::{Any, CorsLayer};

use super::commands::{
    self, AddStepRequest, CommandResponse, LinkRequest, SetValueRequest, SnapshotList, StartRequest,
};
use crate::host::EngineHost;

/// Shared state for axum handlers
type ServerState = Arc<EngineHost>;

type CommandReply = (StatusCode, Json<CommandResponse>);

fn reply(response: CommandResponse) -> CommandReply {
    (response.outcome.status_code(), Json(response))
}

/// Routes of the control surface
pub fn router(host: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/abort", post(abort_handler))
        .route("/steps", post(add_step_handler))
        .route("/steps/:id", delete(remove_step_handler))
        .route("/links", post(link_handler))
        .route("/links/:id", delete(unlink_handler))
        .route("/ports/:id/value", put(set_port_value_handler))
        .route("/snapshots", get(snapshots_handler))
        .route("/snapshots/:iteration_id", get(snapshot_handler))
        .layer(cors)
        .with_state(host)
}

/// Bind the control surface and serve it on a background task
pub async fn start_server(
    host: ServerState,
    bind_address: &str,
) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = router(host);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    let addr = listener.local_addr()?;

    log::info!("Control surface listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("Control surface error: {}", e);
        }
    });

    Ok((addr, handle))
}

// --- Axum Handlers ---

async fn health_handler() -> &'static str {
    "ok"
}

async fn status_handler(State(host): State<ServerState>) -> Json<EngineMeta> {
    Json(commands::status(&host).await)
}

async fn start_handler(
    State(host): State<ServerState>,
    Json(request): Json<StartRequest>,
) -> CommandReply {
    reply(commands::start(&host, request).await)
}

async fn stop_handler(State(host): State<ServerState>) -> CommandReply {
    reply(commands::stop(&host).await)
}

async fn abort_handler(State(host): State<ServerState>) -> CommandReply {
    reply(commands::abort(&host).await)
}

async fn add_step_handler(
    State(host): State<ServerState>,
    Json(request): Json<AddStepRequest>,
) -> CommandReply {
    reply(commands::add_step(&host, request).await)
}

async fn remove_step_handler(
    State(host): State<ServerState>,
    Path(step_id): Path<String>,
) -> CommandReply {
    reply(commands::remove_step(&host, &step_id).await)
}

async fn link_handler(
    State(host): State<ServerState>,
    Json(request): Json<LinkRequest>,
) -> CommandReply {
    reply(commands::link(&host, request).await)
}

async fn unlink_handler(
    State(host): State<ServerState>,
    Path(link_id): Path<String>,
) -> CommandReply {
    reply(commands::unlink(&host, &link_id).await)
}

async fn set_port_value_handler(
    State(host): State<ServerState>,
    Path(port_id): Path<String>,
    Json(request): Json<SetValueRequest>,
) -> CommandReply {
    reply(commands::set_port_value(&host, &port_id, request).await)
}

async fn snapshots_handler(State(host): State<ServerState>) -> Json<SnapshotList> {
    Json(commands::snapshots(&host))
}

async fn snapshot_handler(
    State(host): State<ServerState>,
    Path(iteration_id): Path<String>,
) -> Result<Json<ProjectDefinition>, CommandReply> {
    commands::snapshot(&host, &iteration_id)
        .map(Json)
        .map_err(reply)
}
