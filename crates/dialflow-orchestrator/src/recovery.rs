//! Startup recovery: re-arms durable pending work after a restart.
//!
//! In-memory timers die with the process. Anything that must happen later
//! (an agent's next-lead continuation, a scheduled dial) also lives in
//! durable storage, and this pass turns those rows back into running loops
//! and timers. Due scheduled calls themselves are covered by the scheduler's
//! startup tick.

use crate::orchestrator::Orchestrator;
use crate::{with_conn, OrchestratorError};
use dialflow_types::AgentStatus;
use std::sync::Arc;

/// Resumes agents a previous process left running and clears their stale
/// next-lead continuations (a resumed loop schedules its own). Returns the
/// number of agents resumed.
pub async fn recover_pending_work(orch: &Arc<Orchestrator>) -> Result<usize, OrchestratorError> {
    let agents = with_conn(orch.pool(), dialflow_db::list_agents).await?;

    let mut resumed = 0;
    for agent in agents {
        if agent.status == AgentStatus::Running && !orch.registry().contains(&agent.id) {
            tracing::info!(
                agent_id = %agent.id,
                queued = agent.lead_queue.len(),
                "resuming agent left running by a previous process"
            );
            orch.spawn_loop(agent.id.clone());
            resumed += 1;
        }
    }

    let pending = with_conn(orch.pool(), dialflow_db::list_pending_actions).await?;
    for action in pending {
        if action.kind == "process-next-lead" {
            let id = action.id.clone();
            if let Err(e) = with_conn(orch.pool(), move |conn| {
                dialflow_db::complete_scheduled_action(conn, &id)
            })
            .await
            {
                tracing::warn!(action_id = %action.id, "failed to clear stale continuation: {e}");
            }
        }
    }

    Ok(resumed)
}
