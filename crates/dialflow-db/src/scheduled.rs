//! Scheduled-action persistence helpers.
//!
//! Scheduled actions are the durable source of truth for pending future
//! work (a delayed dial, the next-lead continuation of a paused agent).
//! The startup recovery pass re-arms timers from this table so a restart
//! never loses pending work.

use crate::StoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

/// One pending (or completed) future action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledAction {
    pub id: String,
    /// Action kind, e.g. `dial-call` or `process-next-lead`.
    pub kind: String,
    pub agent_id: Option<String>,
    pub call_id: Option<String>,
    /// SQLite `datetime` format.
    pub due_at: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<ScheduledAction> {
    Ok(ScheduledAction {
        id: row.get(0)?,
        kind: row.get(1)?,
        agent_id: row.get(2)?,
        call_id: row.get(3)?,
        due_at: row.get(4)?,
        created_at: row.get(5)?,
        completed_at: row.get(6)?,
    })
}

const ACTION_COLUMNS: &str = "id, kind, agent_id, call_id, due_at, created_at, completed_at";

/// Inserts a new pending action.
pub fn create_scheduled_action(
    conn: &Connection,
    action: &ScheduledAction,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO scheduled_actions (id, kind, agent_id, call_id, due_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            action.id,
            action.kind,
            action.agent_id,
            action.call_id,
            action.due_at,
        ],
    )?;
    Ok(())
}

/// Lists every pending action, soonest first. Used by startup recovery.
pub fn list_pending_actions(conn: &Connection) -> Result<Vec<ScheduledAction>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACTION_COLUMNS} FROM scheduled_actions
         WHERE completed_at IS NULL
         ORDER BY due_at ASC"
    ))?;
    let rows = stmt.query_map([], map_row)?;
    let mut actions = Vec::new();
    for row in rows {
        actions.push(row?);
    }
    Ok(actions)
}

/// Lists pending actions that are already due, soonest first.
pub fn list_due_actions(conn: &Connection, limit: i64) -> Result<Vec<ScheduledAction>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACTION_COLUMNS} FROM scheduled_actions
         WHERE completed_at IS NULL AND due_at <= datetime('now')
         ORDER BY due_at ASC
         LIMIT ?1"
    ))?;
    let rows = stmt.query_map([limit], map_row)?;
    let mut actions = Vec::new();
    for row in rows {
        actions.push(row?);
    }
    Ok(actions)
}

/// Marks an action completed. Completing twice is a no-op.
pub fn complete_scheduled_action(conn: &Connection, id: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE scheduled_actions SET completed_at = datetime('now')
         WHERE id = ?1 AND completed_at IS NULL",
        [id],
    )?;
    Ok(())
}
