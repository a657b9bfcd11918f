//! Lamp Automation - event engine and HTTP API server

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use device_store::{DeviceStore, JsonDeviceStore, StoreError};
use event_engine::{
    DaylightFeed, DispatchOutcome, EventEngine, RandomSource, SeededRandom, SystemClock,
};
use holidays::HolidayCalendar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod rules;
mod websocket;

use config::ServerConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EventEngine>,
    pub store: Arc<JsonDeviceStore>,
    pub feed: Arc<DaylightFeed>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Power request body
#[derive(Deserialize)]
struct PowerRequest {
    on: bool,
}

fn store_error(e: &StoreError) -> (StatusCode, Json<ApiResponse>) {
    let status = match e {
        StoreError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

fn outcome_json(outcome: &DispatchOutcome) -> serde_json::Value {
    let failures: Vec<String> = outcome.failures.iter().map(ToString::to_string).collect();
    serde_json::json!({
        "invoked": outcome.invoked,
        "failures": failures,
    })
}

/// List all devices
async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.store.get_all()))
}

/// Get a specific device
async fn get_device(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_by_id(&id) {
        Ok(device) => (StatusCode::OK, Json(ApiResponse::success(device))),
        Err(e) => store_error(&e),
    }
}

/// Turn a device on or off
async fn set_device_power(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PowerRequest>,
) -> impl IntoResponse {
    let engine = state.engine.clone();
    let target = id.clone();
    match tokio::task::spawn_blocking(move || engine.set_power(&target, req.on)).await {
        Ok(Ok(device)) => {
            tracing::info!("Set device {} {}", id, if req.on { "on" } else { "off" });
            (StatusCode::OK, Json(ApiResponse::success(device)))
        }
        Ok(Err(e)) => store_error(&e),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Dispatch a named event immediately
async fn trigger_event(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Event name must not be empty")),
        );
    }

    let engine = state.engine.clone();
    match tokio::task::spawn_blocking(move || engine.trigger_named(&name)).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(outcome_json(&outcome))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Snapshot of the pending queue
async fn pending_events(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.engine.scheduler().pending()))
}

/// Last observed daylight state
async fn daylight_state(State(state): State<AppState>) -> impl IntoResponse {
    match state.feed.state() {
        Some(daylight) => (StatusCode::OK, Json(ApiResponse::success(daylight))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("Daylight not observed yet")),
        ),
    }
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lamp_server=debug,event_engine=debug,info".into()),
        )
        .init();

    tracing::info!("Starting Lamp Automation server");

    let config = ServerConfig::from_env()?;
    tracing::debug!("Configuration: {:?}", config);

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let store = Arc::new(JsonDeviceStore::open(&config.lamps_path()).await);
    tracing::info!("Loaded {} devices from {:?}", store.len(), config.lamps_path());

    let clock = Arc::new(SystemClock);
    let random: Arc<dyn RandomSource> = match config.rng_seed {
        Some(seed) => Arc::new(SeededRandom::from_seed(seed)),
        None => Arc::new(SeededRandom::from_entropy()),
    };

    let engine = Arc::new(EventEngine::new(store.clone(), clock.clone(), random));
    engine.set_holidays(HolidayCalendar::swedish());
    rules::install(&engine)?;

    let feed = Arc::new(DaylightFeed::new(config.coordinate, clock));
    engine.start();
    engine.attach_feed(feed.clone(), config.daylight_poll);

    let state = AppState {
        engine: engine.clone(),
        store,
        feed,
    };

    // Build the router
    let app = Router::new()
        .route("/health", get(health))
        .route("/devices", get(list_devices))
        .route("/devices/:id", get(get_device).post(set_device_power))
        .route("/events/pending", get(pending_events))
        .route("/events/:name", post(trigger_event))
        .route("/daylight", get(daylight_state))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    tracing::info!("Listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.stop().await;
    tracing::info!("Server stopped");

    Ok(())
}
