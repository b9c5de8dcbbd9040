//! Call listing, scheduling, and webhook REST handlers.

use crate::{audit_event, AppState};
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use dialflow_audit::AuditPayload;
use dialflow_db::{Call, CreateCallParams};
use dialflow_types::{CallDirection, CallStatus, HubEvent};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListCallsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// `GET /api/calls` — lists recent calls.
///
/// An opportunistic reconciler pass runs first, so calls stuck in `queued`
/// by a crash or provider silence are repaired before anyone sees them.
pub async fn list_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListCallsQuery>,
) -> Result<Json<Vec<Call>>, (StatusCode, Json<Value>)> {
    dialflow_orchestrator::reconcile_stuck_calls(&state.orchestrator).await;

    let limit = query.limit.clamp(1, 500);
    let pool = state.pool.clone();
    let calls = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        dialflow_db::list_calls(&conn, limit).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?
    .map_err(internal_error)?;
    Ok(Json(calls))
}

/// Request body for scheduling a future call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCallRequest {
    pub phone: String,
    /// RFC 3339 due time; must be in the future.
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// `POST /api/calls/schedule` — durably schedules an outbound call.
///
/// A due time in the past is a validation error with no side effect; the
/// scheduler loop fires the call once the due time passes.
pub async fn schedule_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ScheduleCallRequest>,
) -> Result<(StatusCode, Json<Call>), (StatusCode, Json<Value>)> {
    if req.scheduled_at <= Utc::now() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "scheduledAt must be in the future" })),
        ));
    }
    let normalized = dialflow_compliance::normalize_phone(&req.phone);
    if normalized.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "phone is not a dialable number" })),
        ));
    }
    if state.dnc.is_blocked(&req.phone).await.unwrap_or(false) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "number is on the do-not-call list" })),
        ));
    }

    let due_at = dialflow_db::to_sql_datetime(req.scheduled_at);
    let call_id = Uuid::new_v4().to_string();
    let params = CreateCallParams {
        id: call_id.clone(),
        lead_id: req.lead_id,
        agent_id: req.agent_id,
        direction: CallDirection::Outbound,
        status: CallStatus::Scheduled,
        phone: normalized,
        scheduled_at: Some(due_at.clone()),
    };

    let pool = state.pool.clone();
    let call = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        dialflow_db::create_call(&conn, &params).map_err(|e| e.to_string())?;
        dialflow_db::get_call(&conn, &params.id).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?
    .map_err(internal_error)?;

    audit_event(
        &state,
        call_id.clone(),
        AuditPayload::CallScheduled {
            call_id: call_id.clone(),
            due_at,
        },
    )
    .await;
    let _ = state.events_tx.send(HubEvent::CallUpdate {
        call_id,
        status: CallStatus::Scheduled,
        duration_secs: None,
    });

    Ok((StatusCode::CREATED, Json(call)))
}

/// `POST /api/telephony/webhook` — accepts a raw provider payload,
/// normalizes it through the telephony adapter, and applies the status to
/// the matching call.
pub async fn telephony_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let event = state
        .orchestrator
        .telephony_webhook(&payload)
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
        })?;

    let provider_call_id = event.provider_call_id.clone();
    let pool = state.pool.clone();
    let status = event.status;
    let duration = event.duration_secs;
    let call_id = tokio::task::spawn_blocking(move || -> Result<Option<String>, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        match dialflow_db::get_call_by_provider_id(&conn, &provider_call_id) {
            Ok(call) => {
                dialflow_db::update_call_status(&conn, &call.id, status, None)
                    .map_err(|e| e.to_string())?;
                Ok(Some(call.id))
            }
            Err(dialflow_db::StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?
    .map_err(internal_error)?;

    match call_id {
        Some(call_id) => {
            let _ = state.events_tx.send(HubEvent::CallUpdate {
                call_id: call_id.clone(),
                status,
                duration_secs: duration,
            });
            Ok(Json(json!({ "callId": call_id, "applied": true })))
        }
        None => {
            tracing::warn!(
                provider_call_id = %event.provider_call_id,
                "webhook for unknown provider call"
            );
            Ok(Json(json!({ "applied": false })))
        }
    }
}

fn internal_error(message: String) -> (StatusCode, Json<Value>) {
    tracing::error!("call handler failed: {message}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}
