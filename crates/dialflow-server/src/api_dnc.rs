//! DNC list REST handlers.

use crate::{audit_event, AppState};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use dialflow_audit::AuditPayload;
use dialflow_db::DncEntry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// `GET /api/dnc` — lists every blocked number.
pub async fn list_dnc_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<DncEntry>>, (StatusCode, Json<Value>)> {
    let pool = state.pool.clone();
    let entries = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        dialflow_db::list_dnc_numbers(&conn).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| internal_error(e.to_string()))?
    .map_err(internal_error)?;
    Ok(Json(entries))
}

/// Request body for adding a blocked number.
#[derive(Debug, Deserialize)]
pub struct AddDncRequest {
    pub phone: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /api/dnc` — adds a number: durable storage first, then the cache.
pub async fn add_dnc_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<AddDncRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if dialflow_compliance::normalize_phone(&req.phone).is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "phone is not a dialable number" })),
        ));
    }

    let normalized = state
        .dnc
        .add_to_dnc(&req.phone, req.reason.as_deref())
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    audit_event(
        &state,
        normalized.clone(),
        AuditPayload::DncAdded {
            phone: normalized.clone(),
        },
    )
    .await;
    Ok((StatusCode::CREATED, Json(json!({ "phone": normalized }))))
}

/// `DELETE /api/dnc/{phone}` — removes a number from the list.
pub async fn remove_dnc_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let normalized = state
        .dnc
        .remove_from_dnc(&phone)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    audit_event(
        &state,
        normalized.clone(),
        AuditPayload::DncRemoved {
            phone: normalized.clone(),
        },
    )
    .await;
    Ok(Json(json!({ "phone": normalized, "removed": true })))
}

fn internal_error(message: String) -> (StatusCode, Json<Value>) {
    tracing::error!("dnc handler failed: {message}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}
