use crate::broadcast::Broadcaster;
use crate::config::HubConfig;
use crate::pump::UpdatePump;
use crate::runner::{launch_banner, RunnerControl, StartRequest};
use crate::watcher::{FileChangeWatcher, WatchOptions};
use anyhow::Context;
use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use ralph_core::{status, tasks, ClientMessage, PushEvent};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

const MAX_CLIENT_MESSAGE_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    pub broadcaster: Arc<Broadcaster>,
    pub pump: Arc<UpdatePump>,
    pub runner: Arc<RunnerControl>,
}

impl AppState {
    pub fn new(config: HubConfig) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(config.queue_capacity));
        let runner = Arc::new(RunnerControl::new(&config));
        let pump = Arc::new(UpdatePump::new(&config, broadcaster.clone(), runner.clone()));
        Self {
            config: Arc::new(config),
            broadcaster,
            pump,
            runner,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .route("/api/ralph/status", get(get_status))
        .route("/api/ralph/tasks", get(get_tasks))
        .route("/api/ralph/tasks/toggle", post(toggle_task))
        .route("/api/ralph/files", get(get_files))
        .route("/api/ralph/logs", get(get_logs).delete(clear_logs))
        .route("/api/ralph/start", post(start_loop))
        .route("/api/ralph/stop", post(stop_loop))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds, starts the watcher and pump, and serves until ctrl-c.
pub async fn serve(config: HubConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid address {}", config.addr))?;
    if !addr.ip().is_loopback() && !config.allow_remote {
        anyhow::bail!("refusing non-loopback address {addr} without --allow-remote");
    }

    let state = AppState::new(config.clone());
    state.pump.prime().await;

    let options = WatchOptions {
        debounce: config.debounce,
        ..WatchOptions::default()
    };
    let (watcher, kinds) = FileChangeWatcher::start(&config.files, options)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pump_task = tokio::spawn(
        state
            .pump
            .clone()
            .run(kinds, shutdown_rx, config.files_interval),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        event = "hub_start",
        addr = %addr,
        root = %config.project_root.display()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown");
    };
    let app = router(state.clone());
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    let _ = shutdown_tx.send(true);
    watcher.cancel();
    state.broadcaster.shutdown();
    let _ = pump_task.await;
    if let Err(err) = &result {
        error!(event = "hub_error", error = %err);
    }
    result.context("serve")
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_status(State(state): State<AppState>) -> Response {
    match state.pump.status_snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => {
            warn!(event = "status_unavailable", kind = err.kind(), error = %err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": err.to_string(), "kind": err.kind() })),
            )
                .into_response()
        }
    }
}

async fn get_tasks(State(state): State<AppState>) -> Response {
    Json(tasks::load(&state.config.files.tasks)).into_response()
}

async fn get_files(State(state): State<AppState>) -> Response {
    Json(state.pump.changed_files().await).into_response()
}

async fn get_logs(State(state): State<AppState>) -> Response {
    match state.pump.log_text() {
        Ok(text) => text.into_response(),
        Err(err) => {
            warn!(event = "log_read_failed", error = %err);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error reading logs.").into_response()
        }
    }
}

async fn clear_logs(State(state): State<AppState>) -> Response {
    match state.pump.clear_logs(None).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(err) => {
            warn!(event = "log_clear_failed", error = %err);
            Json(json!({ "success": false, "error": "Failed to clear logs" })).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    description: String,
    completed: bool,
}

async fn toggle_task(State(state): State<AppState>, Json(body): Json<ToggleRequest>) -> Response {
    match tasks::toggle(&state.config.files.tasks, &body.description, body.completed) {
        Ok(true) => {
            state.pump.refresh_tasks();
            Json(json!({ "success": true })).into_response()
        }
        Ok(false) => Json(json!({ "success": false })).into_response(),
        Err(err) => {
            warn!(event = "toggle_failed", error = %err);
            Json(json!({ "success": false, "error": err.to_string() })).into_response()
        }
    }
}

async fn start_loop(State(state): State<AppState>, Json(body): Json<StartRequest>) -> Response {
    let agent = match body.validate() {
        Ok(agent) => agent,
        Err(err) => {
            return Json(json!({ "success": false, "error": err.to_string() })).into_response()
        }
    };
    if let Err(err) = state.pump.clear_logs(Some(&launch_banner(agent))).await {
        warn!(event = "log_clear_failed", error = %err);
    }
    match state.runner.spawn(&body, agent).await {
        Ok(_) => Json(json!({ "success": true })).into_response(),
        Err(err) => {
            error!(event = "runner_spawn_failed", error = %err);
            Json(json!({ "success": false, "error": "Failed to spawn" })).into_response()
        }
    }
}

async fn stop_loop(State(state): State<AppState>) -> Response {
    if let Err(err) = status::mark_inactive(&state.config.files.status) {
        error!(event = "mark_inactive_failed", error = %err);
        return Json(json!({ "success": false, "error": "Failed to send stop signal" }))
            .into_response();
    }
    state.runner.stop().await;
    state.pump.refresh_status().await;
    Json(json!({ "success": true })).into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if !addr.ip().is_loopback() && !state.config.allow_remote {
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(state, socket, addr))
}

async fn handle_socket(state: AppState, socket: WebSocket, remote: SocketAddr) {
    let mut subscription = match state.broadcaster.subscribe() {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "subscribe_refused", remote = %remote, error = %err);
            return;
        }
    };
    let id = subscription.id;
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (ping_tx, mut ping_rx) = mpsc::channel::<()>(1);
    let write_timeout = state.config.write_timeout;

    let write_task = tokio::spawn(async move {
        let mut pinging = true;
        loop {
            let msg = tokio::select! {
                raw = subscription.receiver.recv() => match raw {
                    Some(raw) => Message::Text(raw),
                    None => break,
                },
                tick = ping_rx.recv(), if pinging => match tick {
                    Some(()) => Message::Ping(Vec::new()),
                    None => {
                        pinging = false;
                        continue;
                    }
                },
            };
            let send = ws_sender.send(msg);
            match tokio::time::timeout(write_timeout, send).await {
                Ok(Ok(())) => {}
                _ => break,
            }
        }
        let _ = ws_sender.close().await;
    });

    let ping_task = start_ping(state.config.ping_interval, ping_tx);
    info!(event = "ws_connected", subscriber = id, remote = %remote);

    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(value) => value,
            Err(err) => {
                debug!(event = "read_error", subscriber = id, error = %err);
                break;
            }
        };
        let data = match msg {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if data.len() > MAX_CLIENT_MESSAGE_BYTES {
            warn!(event = "message_too_large", subscriber = id, size = data.len());
            continue;
        }
        match serde_json::from_slice::<ClientMessage>(&data) {
            Ok(ClientMessage::Ping) => {
                state.broadcaster.send_to(id, PushEvent::Pong);
            }
            Ok(ClientMessage::InitialState) => {
                if let Some(status) = state.broadcaster.snapshot().status {
                    state.broadcaster.send_to(id, PushEvent::Status(status));
                }
            }
            Err(err) => {
                warn!(event = "message_invalid", subscriber = id, error = %err);
            }
        }
    }

    state.broadcaster.unsubscribe(id);
    if let Some(task) = ping_task {
        task.abort();
    }
    let _ = write_task.await;
    info!(event = "ws_disconnected", subscriber = id);
}

fn start_ping(interval: Duration, tx: mpsc::Sender<()>) -> Option<tokio::task::JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(()).await.is_err() {
                return;
            }
        }
    }))
}
