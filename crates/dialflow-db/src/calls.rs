//! Call persistence helpers.

use crate::StoreError;
use dialflow_types::{CallDirection, CallOutcome, CallStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A single call leg.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub id: String,
    pub lead_id: Option<String>,
    pub agent_id: Option<String>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub phone: String,
    /// Opaque handle from the telephony adapter.
    pub provider_call_id: Option<String>,
    pub outcome: Option<CallOutcome>,
    pub recording_url: Option<String>,
    pub transcription: Option<String>,
    pub summary: Option<String>,
    pub sentiment: Option<String>,
    pub duration_secs: Option<u32>,
    pub failure_reason: Option<String>,
    pub scheduled_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Parameters for creating a new call row.
#[derive(Debug, Clone)]
pub struct CreateCallParams {
    pub id: String,
    pub lead_id: Option<String>,
    pub agent_id: Option<String>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub phone: String,
    /// Required when `status` is `Scheduled`; SQLite `datetime` format.
    pub scheduled_at: Option<String>,
}

fn map_row_to_call(row: &Row<'_>) -> rusqlite::Result<Call> {
    let direction_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let outcome_str: Option<String> = row.get(7)?;

    Ok(Call {
        id: row.get(0)?,
        lead_id: row.get(1)?,
        agent_id: row.get(2)?,
        direction: CallDirection::from_str_opt(&direction_str)
            .unwrap_or(CallDirection::Outbound),
        status: CallStatus::from_str_opt(&status_str).unwrap_or(CallStatus::Failed),
        phone: row.get(5)?,
        provider_call_id: row.get(6)?,
        outcome: outcome_str.as_deref().and_then(CallOutcome::from_str_opt),
        recording_url: row.get(8)?,
        transcription: row.get(9)?,
        summary: row.get(10)?,
        sentiment: row.get(11)?,
        duration_secs: row.get(12)?,
        failure_reason: row.get(13)?,
        scheduled_at: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

const CALL_COLUMNS: &str = "id, lead_id, agent_id, direction, status, phone, provider_call_id,
     outcome, recording_url, transcription, summary, sentiment, duration_secs,
     failure_reason, scheduled_at, created_at, updated_at";

/// Inserts a new call row.
pub fn create_call(conn: &Connection, params: &CreateCallParams) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO calls (id, lead_id, agent_id, direction, status, phone, scheduled_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            params.id,
            params.lead_id,
            params.agent_id,
            params.direction.as_str(),
            params.status.as_str(),
            params.phone,
            params.scheduled_at,
        ],
    )?;
    Ok(())
}

/// Retrieves a call by id.
pub fn get_call(conn: &Connection, id: &str) -> Result<Call, StoreError> {
    conn.query_row(
        &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
        [id],
        map_row_to_call,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound {
        entity: "call",
        id: id.to_string(),
    })
}

/// Looks up a call by the provider's opaque handle. Used by webhook
/// normalization.
pub fn get_call_by_provider_id(
    conn: &Connection,
    provider_call_id: &str,
) -> Result<Call, StoreError> {
    conn.query_row(
        &format!("SELECT {CALL_COLUMNS} FROM calls WHERE provider_call_id = ?1"),
        [provider_call_id],
        map_row_to_call,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound {
        entity: "call",
        id: provider_call_id.to_string(),
    })
}

/// Lists the most recent calls, newest first.
pub fn list_calls(conn: &Connection, limit: i64) -> Result<Vec<Call>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CALL_COLUMNS} FROM calls ORDER BY created_at DESC, id DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map([limit], map_row_to_call)?;
    let mut calls = Vec::new();
    for row in rows {
        calls.push(row?);
    }
    Ok(calls)
}

/// Counts calls attributed to an agent.
pub fn count_calls_for_agent(conn: &Connection, agent_id: &str) -> Result<u32, StoreError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM calls WHERE agent_id = ?1",
        [agent_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Updates a call's status, optionally recording a failure reason.
pub fn update_call_status(
    conn: &Connection,
    id: &str,
    status: CallStatus,
    failure_reason: Option<&str>,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE calls
         SET status = ?2,
             failure_reason = COALESCE(?3, failure_reason),
             updated_at = datetime('now')
         WHERE id = ?1",
        params![id, status.as_str(), failure_reason],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "call",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Records the provider handle and status returned by a dial attempt.
pub fn set_provider_call(
    conn: &Connection,
    id: &str,
    provider_call_id: &str,
    status: CallStatus,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE calls
         SET provider_call_id = ?2, status = ?3, updated_at = datetime('now')
         WHERE id = ?1",
        params![id, provider_call_id, status.as_str()],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "call",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Persists the end-of-call analysis.
#[allow(clippy::too_many_arguments)]
pub fn record_call_result(
    conn: &Connection,
    id: &str,
    status: CallStatus,
    outcome: CallOutcome,
    duration_secs: Option<u32>,
    transcription: Option<&str>,
    summary: Option<&str>,
    sentiment: Option<&str>,
    recording_url: Option<&str>,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE calls
         SET status = ?2,
             outcome = ?3,
             duration_secs = COALESCE(?4, duration_secs),
             transcription = COALESCE(?5, transcription),
             summary = COALESCE(?6, summary),
             sentiment = COALESCE(?7, sentiment),
             recording_url = COALESCE(?8, recording_url),
             updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            status.as_str(),
            outcome.as_str(),
            duration_secs,
            transcription,
            summary,
            sentiment,
            recording_url,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "call",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Selects scheduled calls that are due, oldest first, bounded by `limit`.
pub fn list_due_scheduled(conn: &Connection, limit: i64) -> Result<Vec<Call>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CALL_COLUMNS} FROM calls
         WHERE status = 'scheduled' AND scheduled_at IS NOT NULL
           AND scheduled_at <= datetime('now')
         ORDER BY scheduled_at ASC
         LIMIT ?1"
    ))?;
    let rows = stmt.query_map([limit], map_row_to_call)?;
    let mut calls = Vec::new();
    for row in rows {
        calls.push(row?);
    }
    Ok(calls)
}

/// Selects calls stuck in `queued` for longer than `older_than_secs`,
/// oldest first, bounded by `limit`. These are reconciler candidates.
pub fn list_stuck_queued(
    conn: &Connection,
    older_than_secs: u64,
    limit: i64,
) -> Result<Vec<Call>, StoreError> {
    let cutoff_modifier = format!("-{} seconds", older_than_secs);
    let mut stmt = conn.prepare(&format!(
        "SELECT {CALL_COLUMNS} FROM calls
         WHERE status = 'queued' AND created_at <= datetime('now', ?1)
         ORDER BY created_at ASC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![cutoff_modifier, limit], map_row_to_call)?;
    let mut calls = Vec::new();
    for row in rows {
        calls.push(row?);
    }
    Ok(calls)
}
