//! Agent control REST handlers.

use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use dialflow_db::AgentRecord;
use dialflow_orchestrator::OrchestratorError;
use dialflow_types::AgentConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Request body for spawning an agent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnAgentRequest {
    pub lead_ids: Vec<String>,
    #[serde(default)]
    pub config: AgentConfig,
}

/// Maps orchestrator errors onto HTTP responses.
fn error_response(err: OrchestratorError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        OrchestratorError::NoEligibleLeads => StatusCode::BAD_REQUEST,
        OrchestratorError::AgentAlreadyRunning(_) | OrchestratorError::AgentCompleted(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::Store(dialflow_db::StoreError::NotFound { .. }) => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("agent operation failed: {err}");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

/// `POST /api/agents` — creates an agent with an immutable queue snapshot of
/// the eligible leads.
pub async fn spawn_agent_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<SpawnAgentRequest>,
) -> Result<(StatusCode, Json<AgentRecord>), (StatusCode, Json<Value>)> {
    let record = state
        .orchestrator
        .spawn_agent(req.lead_ids, req.config)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /api/agents` — lists every agent snapshot.
pub async fn list_agents_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<AgentRecord>>, (StatusCode, Json<Value>)> {
    let pool = state.pool.clone();
    let agents = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        dialflow_db::list_agents(&conn).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?
    .map_err(internal_error)?;
    Ok(Json(agents))
}

/// `GET /api/agents/{agentId}` — one agent plus the derived flow-graph view
/// a front end needs to render and animate the step machine.
pub async fn get_agent_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let pool = state.pool.clone();
    let record = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| OrchestratorError::Pool(e.to_string()))?;
        dialflow_db::get_agent(&conn, &agent_id).map_err(OrchestratorError::from)
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?
    .map_err(error_response)?;

    let graph = dialflow_steps::flow_graph(record.current_step);
    Ok(Json(json!({ "agent": record, "flowGraph": graph })))
}

/// `POST /api/agents/{agentId}/start`
pub async fn start_agent_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .orchestrator
        .start_agent(&agent_id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "agentId": agent_id, "status": "running" })))
}

/// `POST /api/agents/{agentId}/pause`
pub async fn pause_agent_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .orchestrator
        .pause_agent(&agent_id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "agentId": agent_id, "status": "paused" })))
}

/// `POST /api/agents/{agentId}/stop`
pub async fn stop_agent_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .orchestrator
        .stop_agent(&agent_id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "agentId": agent_id, "status": "completed" })))
}

fn internal_error(message: String) -> (StatusCode, Json<Value>) {
    tracing::error!("agent handler failed: {message}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}
