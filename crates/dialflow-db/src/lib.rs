//! Database layer for the Dialflow platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and CRUD/query helpers for the durable entities:
//! leads, calls, agent instances, scheduled actions, and the DNC list. Every
//! table is created through versioned migrations managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: no external database process required. WAL
//!   mode allows concurrent readers with a single writer, which matches the
//!   access pattern of one orchestrator loop per agent plus read-mostly APIs.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management. Async callers wrap helper calls in
//!   `tokio::task::spawn_blocking`.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, ensuring migrations ship with the server and cannot
//!   drift from the code that depends on them.
//! - **Helpers over `&Connection`**: every entity helper borrows a plain
//!   connection so callers control pooling and transactions.

mod agents;
mod calls;
mod dnc;
mod leads;
mod migrations;
mod pool;
mod scheduled;

use thiserror::Error;

pub use agents::{get_agent, list_agents, save_agent, save_agent_progress, AgentRecord};
pub use calls::{
    count_calls_for_agent, create_call, get_call, get_call_by_provider_id, list_calls,
    list_due_scheduled, list_stuck_queued, record_call_result, set_provider_call,
    update_call_status, Call, CreateCallParams,
};
pub use dnc::{add_dnc_number, is_dnc_listed, list_dnc_numbers, remove_dnc_number, DncEntry};
pub use leads::{create_lead, get_lead, get_leads, update_lead_status, Lead};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use scheduled::{
    complete_scheduled_action, create_scheduled_action, list_due_actions, list_pending_actions,
    ScheduledAction,
};

/// Errors produced by the entity helpers in this crate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Formats a UTC timestamp the way SQLite's `datetime('now')` does, so
/// Rust-supplied times compare correctly against column defaults.
pub fn to_sql_datetime(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests;
