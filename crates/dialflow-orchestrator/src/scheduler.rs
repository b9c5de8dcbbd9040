//! Scheduler loop: fires due future-scheduled calls.

use crate::orchestrator::Orchestrator;
use crate::with_conn;
use std::sync::Arc;
use std::time::Duration;

/// Runs the scheduler forever: once at startup, then every `interval`.
/// Each tick fires a bounded batch of due scheduled calls; failures are
/// isolated per call and never stop the loop.
pub async fn run_scheduler_loop(orch: Arc<Orchestrator>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "starting call scheduler");
    loop {
        let fired = fire_due_scheduled_calls(&orch).await;
        if fired > 0 {
            tracing::info!(fired, "triggered due scheduled calls");
        }
        tokio::time::sleep(interval).await;
    }
}

/// Selects calls with status `scheduled` whose due time has passed (bounded
/// batch) and triggers dialing for each. Returns the number successfully
/// dialed; a per-call dial failure marks that call failed and does not
/// affect the rest of the batch.
pub async fn fire_due_scheduled_calls(orch: &Orchestrator) -> usize {
    let batch = orch.config().scheduler_batch;
    let due = match with_conn(orch.pool(), move |conn| {
        dialflow_db::list_due_scheduled(conn, batch)
    })
    .await
    {
        Ok(due) => due,
        Err(e) => {
            tracing::error!("scheduler query failed: {e}");
            return 0;
        }
    };

    let mut fired = 0;
    for call in due {
        match orch.dial_scheduled(&call).await {
            Ok(()) => fired += 1,
            Err(e) => {
                tracing::warn!(call_id = %call.id, "scheduled call failed to dial: {e}");
            }
        }
    }
    fired
}
