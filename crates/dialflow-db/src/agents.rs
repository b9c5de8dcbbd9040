//! Agent-instance persistence helpers.
//!
//! The queue, completed-leads log, config, and stats are stored as JSON
//! columns on a single row. The orchestrator loop is the only writer for a
//! given agent, so whole-row saves are race-free and keep the restart
//! snapshot consistent.

use crate::StoreError;
use dialflow_types::{AgentConfig, AgentStats, AgentStatus, CompletedLead, Step};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// The durable snapshot of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub status: AgentStatus,
    pub current_step: Step,
    /// FIFO of lead ids awaiting processing; front popped.
    pub lead_queue: Vec<String>,
    /// Append-only log of finished leads.
    pub completed_leads: Vec<CompletedLead>,
    pub config: AgentConfig,
    pub stats: AgentStats,
    pub created_at: String,
    pub updated_at: String,
}

impl AgentRecord {
    /// Creates a fresh record with an immutable queue snapshot.
    pub fn new(id: String, lead_queue: Vec<String>, config: AgentConfig) -> Self {
        Self {
            id,
            status: AgentStatus::Idle,
            current_step: Step::Idle,
            lead_queue,
            completed_leads: Vec::new(),
            config,
            stats: AgentStats::default(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }
}

fn map_row_to_agent(row: &Row<'_>) -> rusqlite::Result<(AgentRecord, String, String, String, String)> {
    let status_str: String = row.get(1)?;
    let step_str: String = row.get(2)?;
    let queue_json: String = row.get(3)?;
    let completed_json: String = row.get(4)?;
    let config_json: String = row.get(5)?;
    let stats_json: String = row.get(6)?;

    Ok((
        AgentRecord {
            id: row.get(0)?,
            status: AgentStatus::from_str_opt(&status_str).unwrap_or(AgentStatus::Idle),
            current_step: Step::from_str_opt(&step_str).unwrap_or(Step::Idle),
            lead_queue: Vec::new(),
            completed_leads: Vec::new(),
            config: AgentConfig::default(),
            stats: AgentStats::default(),
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        },
        queue_json,
        completed_json,
        config_json,
        stats_json,
    ))
}

fn hydrate(
    parts: (AgentRecord, String, String, String, String),
) -> Result<AgentRecord, StoreError> {
    let (mut record, queue_json, completed_json, config_json, stats_json) = parts;
    record.lead_queue = serde_json::from_str(&queue_json)?;
    record.completed_leads = serde_json::from_str(&completed_json)?;
    record.config = serde_json::from_str(&config_json)?;
    record.stats = serde_json::from_str(&stats_json)?;
    Ok(record)
}

const AGENT_COLUMNS: &str = "id, status, current_step, lead_queue_json, completed_leads_json,
     config_json, stats_json, created_at, updated_at";

/// Inserts or replaces the full agent snapshot.
pub fn save_agent(conn: &Connection, record: &AgentRecord) -> Result<(), StoreError> {
    let queue_json = serde_json::to_string(&record.lead_queue)?;
    let completed_json = serde_json::to_string(&record.completed_leads)?;
    let config_json = serde_json::to_string(&record.config)?;
    let stats_json = serde_json::to_string(&record.stats)?;

    conn.execute(
        "INSERT INTO agent_instances
            (id, status, current_step, lead_queue_json, completed_leads_json,
             config_json, stats_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            current_step = excluded.current_step,
            lead_queue_json = excluded.lead_queue_json,
            completed_leads_json = excluded.completed_leads_json,
            config_json = excluded.config_json,
            stats_json = excluded.stats_json,
            updated_at = datetime('now')",
        params![
            record.id,
            record.status.as_str(),
            record.current_step.as_str(),
            queue_json,
            completed_json,
            config_json,
            stats_json,
        ],
    )?;
    Ok(())
}

/// Updates an agent's progress (step, queue, log, stats) while leaving the
/// `status` column untouched.
///
/// The queue loop persists through this helper so that a concurrent
/// pause/stop (which owns the status column) is never clobbered by an
/// in-flight lead finishing.
pub fn save_agent_progress(conn: &Connection, record: &AgentRecord) -> Result<(), StoreError> {
    let queue_json = serde_json::to_string(&record.lead_queue)?;
    let completed_json = serde_json::to_string(&record.completed_leads)?;
    let config_json = serde_json::to_string(&record.config)?;
    let stats_json = serde_json::to_string(&record.stats)?;

    let changed = conn.execute(
        "UPDATE agent_instances SET
            current_step = ?2,
            lead_queue_json = ?3,
            completed_leads_json = ?4,
            config_json = ?5,
            stats_json = ?6,
            updated_at = datetime('now')
         WHERE id = ?1",
        params![
            record.id,
            record.current_step.as_str(),
            queue_json,
            completed_json,
            config_json,
            stats_json,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "agent",
            id: record.id.clone(),
        });
    }
    Ok(())
}

/// Retrieves an agent snapshot by id.
pub fn get_agent(conn: &Connection, id: &str) -> Result<AgentRecord, StoreError> {
    let parts = conn
        .query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agent_instances WHERE id = ?1"),
            [id],
            map_row_to_agent,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            entity: "agent",
            id: id.to_string(),
        })?;
    hydrate(parts)
}

/// Lists all agent snapshots, newest first.
pub fn list_agents(conn: &Connection) -> Result<Vec<AgentRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {AGENT_COLUMNS} FROM agent_instances ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map([], map_row_to_agent)?;
    let mut agents = Vec::new();
    for row in rows {
        agents.push(hydrate(row?)?);
    }
    Ok(agents)
}
