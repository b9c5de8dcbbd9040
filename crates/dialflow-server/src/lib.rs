//! Dialflow server library logic.

pub mod api_agents;
pub mod api_calls;
pub mod api_dnc;
pub mod api_events;
pub mod api_media;
pub mod config;
pub mod hub;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use dialflow_adapters::{LanguageModel, SpeechToText, TextToSpeech};
use dialflow_compliance::DncCache;
use dialflow_db::DbPool;
use dialflow_engine::EngineConfig;
use dialflow_orchestrator::Orchestrator;
use dialflow_types::HubEvent;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The call orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// DNC compliance cache.
    pub dnc: Arc<DncCache>,
    /// Observer hub for WebSocket fan-out.
    pub hub: hub::ObserverHub,
    /// Broadcast channel all components publish hub events into.
    pub events_tx: broadcast::Sender<HubEvent>,
    /// Live media sessions (call id -> conversation engine).
    pub media_sessions: api_media::MediaSessionRegistry,
    /// Speech-to-text adapter for conversation engines.
    pub stt: Arc<dyn SpeechToText>,
    /// Text-to-speech adapter for conversation engines.
    pub tts: Arc<dyn TextToSpeech>,
    /// Language-model adapter for conversation engines.
    pub llm: Arc<dyn LanguageModel>,
    /// Pipeline defaults applied to every new conversation engine.
    pub engine_defaults: EngineConfig,
}

/// Writes an audit entry and pushes the matching `log` event to observers.
/// Failures are logged as warnings but never block the caller.
pub async fn audit_event(state: &AppState, entity_id: String, payload: dialflow_audit::AuditPayload) {
    let pool = state.pool.clone();
    let event_type = payload.event_type();
    let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        dialflow_audit::emit_event(&conn, &entity_id, &payload).map_err(|e| e.to_string())?;
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(event_type, "failed to write audit entry: {e}"),
        Err(e) => tracing::warn!(event_type, "audit task failed: {e}"),
    }
}

/// Maximum request body size (1 MiB). Protects against OOM from oversized
/// payloads.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/agents",
            post(api_agents::spawn_agent_handler).get(api_agents::list_agents_handler),
        )
        .route("/api/agents/{agentId}", get(api_agents::get_agent_handler))
        .route(
            "/api/agents/{agentId}/start",
            post(api_agents::start_agent_handler),
        )
        .route(
            "/api/agents/{agentId}/pause",
            post(api_agents::pause_agent_handler),
        )
        .route(
            "/api/agents/{agentId}/stop",
            post(api_agents::stop_agent_handler),
        )
        .route("/api/calls", get(api_calls::list_calls_handler))
        .route("/api/calls/schedule", post(api_calls::schedule_call_handler))
        .route(
            "/api/telephony/webhook",
            post(api_calls::telephony_webhook_handler),
        )
        .route(
            "/api/dnc",
            get(api_dnc::list_dnc_handler).post(api_dnc::add_dnc_handler),
        )
        .route("/api/dnc/{phone}", delete(api_dnc::remove_dnc_handler))
        .route("/ws/events", get(api_events::events_ws_handler))
        .route("/ws/media", get(api_media::media_ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
