//! Reconciler: repairs calls stuck in indeterminate provider states.
//!
//! A call left in `queued` past the deadline (a crash between insert and
//! dial, or provider-side silence) would otherwise block a queue forever.
//! The reconciler runs on demand (call-list reads, scheduler ticks), asks
//! the provider for the truth when it can, and marks the rest failed with a
//! descriptive reason rather than retrying indefinitely.

use crate::orchestrator::Orchestrator;
use crate::with_conn;
use dialflow_audit::AuditPayload;
use dialflow_types::{CallStatus, HubEvent};

/// One reconciliation pass. Returns the number of calls repaired. Never
/// errors out of the pass: per-call problems are logged and the batch
/// continues.
pub async fn reconcile_stuck_calls(orch: &Orchestrator) -> usize {
    let timeout_secs = orch.config().stuck_timeout_secs;
    let batch = orch.config().reconciler_batch;
    let stuck = match with_conn(orch.pool(), move |conn| {
        dialflow_db::list_stuck_queued(conn, timeout_secs, batch)
    })
    .await
    {
        Ok(stuck) => stuck,
        Err(e) => {
            tracing::error!("reconciler query failed: {e}");
            return 0;
        }
    };

    let mut repaired = 0;
    for call in stuck {
        // When the provider knows the call, prefer its terminal status over
        // a blind failure.
        let provider_view = match &call.provider_call_id {
            Some(pid) => orch.telephony().get_call_status(pid).await.ok(),
            None => None,
        };

        let (status, reason) = match provider_view {
            Some(view) if view.status.is_terminal() => (
                view.status,
                format!(
                    "reconciled from provider status after {timeout_secs}s stuck in queued"
                ),
            ),
            Some(_) => {
                // The provider says the call is still moving; leave it.
                continue;
            }
            None => (
                CallStatus::Failed,
                format!("stuck in queued for over {timeout_secs}s with no provider status"),
            ),
        };

        let id = call.id.clone();
        let update_reason = reason.clone();
        let result = with_conn(orch.pool(), move |conn| {
            dialflow_db::update_call_status(conn, &id, status, Some(&update_reason))
        })
        .await;
        if let Err(e) = result {
            tracing::error!(call_id = %call.id, "reconciler failed to update call: {e}");
            continue;
        }

        orch.audit(
            call.id.clone(),
            AuditPayload::CallReconciled {
                call_id: call.id.clone(),
                reason: reason.clone(),
            },
        )
        .await;
        orch.publish(HubEvent::CallUpdate {
            call_id: call.id.clone(),
            status,
            duration_secs: None,
        });
        tracing::info!(call_id = %call.id, status = status.as_str(), "reconciled stuck call");
        repaired += 1;
    }
    repaired
}
