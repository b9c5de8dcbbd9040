//! The call orchestrator and its background passes.
//!
//! The [`Orchestrator`] owns every agent's lead queue and advances one lead
//! at a time through dial → talk → outcome → record → next, driving the step
//! state machine and publishing every transition to observers. Agents run
//! fully in parallel; leads within one agent are strictly serial.
//!
//! The [`scheduler`] module fires due future-scheduled calls on a fixed
//! interval; the [`reconciler`] repairs calls stuck in indeterminate
//! provider states; the [`recovery`] pass re-arms durable pending work after
//! a restart so in-memory timers are never the sole source of truth.

mod error;
mod orchestrator;
mod reconciler;
mod recovery;
mod registry;
mod scheduler;

pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use reconciler::reconcile_stuck_calls;
pub use recovery::recover_pending_work;
pub use registry::AgentRegistry;
pub use scheduler::{fire_due_scheduled_calls, run_scheduler_loop};

use dialflow_db::{DbPool, StoreError};

/// Runs a storage closure on a pooled connection under `spawn_blocking`.
pub(crate) async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, OrchestratorError>
where
    F: FnOnce(&rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| OrchestratorError::Pool(e.to_string()))?;
        f(&conn).map_err(OrchestratorError::from)
    })
    .await
    .map_err(|e| OrchestratorError::Join(e.to_string()))?
}
