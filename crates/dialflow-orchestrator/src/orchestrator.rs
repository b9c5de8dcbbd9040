//! The per-agent queue-processing loop and its control surface.

use crate::registry::AgentRegistry;
use crate::{with_conn, OrchestratorError};
use dialflow_adapters::{DialContext, TelephonyProvider};
use dialflow_audit::AuditPayload;
use dialflow_compliance::{normalize_phone, DncCache};
use dialflow_db::{AgentRecord, CreateCallParams, DbPool, ScheduledAction};
use dialflow_types::{
    AgentConfig, AgentStatus, CallDirection, CallOutcome, CallStatus, CompletedLead, HubEvent,
    LogLevel, Step,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Orchestrator tunables. The defaults match production cadence; tests
/// shrink them.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interval between provider status polls for a live call.
    pub poll_interval: Duration,
    /// Maximum time to wait for a call to complete before treating it as
    /// failed-by-timeout.
    pub max_poll_wait: Duration,
    /// Age past which a `queued` call is considered stuck.
    pub stuck_timeout_secs: u64,
    /// Maximum due calls fired per scheduler tick.
    pub scheduler_batch: i64,
    /// Maximum stuck calls repaired per reconciler pass.
    pub reconciler_batch: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_poll_wait: Duration::from_secs(300),
            stuck_timeout_secs: 120,
            scheduler_batch: 20,
            reconciler_batch: 20,
        }
    }
}

/// Owns every agent's queue and advances one lead at a time per agent.
pub struct Orchestrator {
    pool: DbPool,
    telephony: Arc<dyn TelephonyProvider>,
    dnc: Arc<DncCache>,
    events: broadcast::Sender<HubEvent>,
    registry: Arc<AgentRegistry>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        pool: DbPool,
        telephony: Arc<dyn TelephonyProvider>,
        dnc: Arc<DncCache>,
        events: broadcast::Sender<HubEvent>,
        registry: Arc<AgentRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            telephony,
            dnc,
            events,
            registry,
            config,
        }
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub(crate) fn telephony(&self) -> &Arc<dyn TelephonyProvider> {
        &self.telephony
    }

    pub(crate) fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Publishes an event to the hub. Lagged or absent observers are the
    /// hub's problem, never the publisher's.
    pub(crate) fn publish(&self, event: HubEvent) {
        let _ = self.events.send(event);
    }

    fn publish_log(&self, agent_id: &str, level: LogLevel, message: impl Into<String>) {
        self.publish(HubEvent::Log {
            agent_id: agent_id.to_string(),
            message: message.into(),
            level,
        });
    }

    /// Writes an audit entry. Audit failures are logged, never propagated;
    /// they must not take down a call loop.
    pub(crate) async fn audit(&self, entity_id: String, payload: AuditPayload) {
        let pool = self.pool.clone();
        let event_type = payload.event_type();
        let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
            let conn = pool.get().map_err(|e| e.to_string())?;
            dialflow_audit::emit_event(&conn, &entity_id, &payload).map_err(|e| e.to_string())?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(event_type, "failed to write audit entry: {e}"),
            Err(e) => tracing::warn!(event_type, "audit task failed: {e}"),
        }
    }

    async fn load_agent(&self, agent_id: &str) -> Result<AgentRecord, OrchestratorError> {
        let id = agent_id.to_string();
        with_conn(&self.pool, move |conn| dialflow_db::get_agent(conn, &id)).await
    }

    async fn save_agent(&self, record: AgentRecord) -> Result<(), OrchestratorError> {
        with_conn(&self.pool, move |conn| dialflow_db::save_agent(conn, &record)).await
    }

    /// Persists queue-loop progress without touching the status column,
    /// which pause/stop own.
    async fn save_progress(&self, record: AgentRecord) -> Result<(), OrchestratorError> {
        with_conn(&self.pool, move |conn| {
            dialflow_db::save_agent_progress(conn, &record)
        })
        .await
    }

    /// Applies one legal step transition: validated, persisted, audited,
    /// published. An illegal request is rejected with no side effect.
    async fn transition(
        &self,
        agent: &mut AgentRecord,
        to: Step,
        data: Option<serde_json::Value>,
    ) -> Result<(), OrchestratorError> {
        let from = agent.current_step;
        agent.current_step = dialflow_steps::apply(from, to)?;
        self.save_progress(agent.clone()).await?;
        self.audit(
            agent.id.clone(),
            AuditPayload::StepChanged {
                agent_id: agent.id.clone(),
                from_step: from,
                to_step: to,
            },
        )
        .await;
        self.publish(HubEvent::StepChange {
            agent_id: agent.id.clone(),
            from_step: from,
            to_step: to,
            data,
        });
        Ok(())
    }

    /// Creates an agent with an immutable snapshot of eligible lead ids.
    ///
    /// Leads without a usable phone and DNC-blocked numbers are filtered
    /// out; if nothing survives, the spawn is rejected with no side effect.
    pub async fn spawn_agent(
        &self,
        lead_ids: Vec<String>,
        config: AgentConfig,
    ) -> Result<AgentRecord, OrchestratorError> {
        if lead_ids.is_empty() {
            return Err(OrchestratorError::NoEligibleLeads);
        }

        let ids = lead_ids.clone();
        let leads = with_conn(&self.pool, move |conn| dialflow_db::get_leads(conn, &ids)).await?;
        let leads = self.dnc.filter_leads(leads).await?;

        let eligible: Vec<String> = leads
            .iter()
            .filter(|lead| {
                lead.phone
                    .as_deref()
                    .map(|p| !normalize_phone(p).is_empty())
                    .unwrap_or(false)
            })
            .map(|lead| lead.id.clone())
            .collect();

        if eligible.is_empty() {
            return Err(OrchestratorError::NoEligibleLeads);
        }

        let record = AgentRecord::new(Uuid::new_v4().to_string(), eligible, config);
        self.save_agent(record.clone()).await?;
        let record = self.load_agent(&record.id).await?;

        self.audit(
            record.id.clone(),
            AuditPayload::AgentSpawned {
                agent_id: record.id.clone(),
                queued_leads: record.lead_queue.len(),
            },
        )
        .await;
        self.publish(HubEvent::Status {
            agent_id: record.id.clone(),
            status: record.status,
            stats: record.stats.clone(),
        });
        tracing::info!(
            agent_id = %record.id,
            queued = record.lead_queue.len(),
            "spawned agent"
        );
        Ok(record)
    }

    /// Starts (or resumes) the agent's queue loop.
    pub async fn start_agent(self: &Arc<Self>, agent_id: &str) -> Result<(), OrchestratorError> {
        if self.registry.contains(agent_id) {
            return Err(OrchestratorError::AgentAlreadyRunning(agent_id.to_string()));
        }

        let mut agent = self.load_agent(agent_id).await?;
        match agent.status {
            AgentStatus::Running => {
                // The durable status says running but no loop is alive;
                // treat as a resume rather than an error.
                tracing::warn!(agent_id, "agent marked running with no live loop, resuming");
            }
            AgentStatus::Completed => {
                return Err(OrchestratorError::AgentCompleted(agent_id.to_string()));
            }
            AgentStatus::Idle | AgentStatus::Paused => {
                agent.status = AgentStatus::Running;
                self.save_agent(agent.clone()).await?;
            }
        }

        self.audit(
            agent.id.clone(),
            AuditPayload::AgentStatusChanged {
                agent_id: agent.id.clone(),
                status: AgentStatus::Running,
            },
        )
        .await;
        self.publish(HubEvent::Status {
            agent_id: agent.id.clone(),
            status: AgentStatus::Running,
            stats: agent.stats.clone(),
        });

        self.spawn_loop(agent_id.to_string());
        Ok(())
    }

    /// Spawns the queue loop task and registers its cancellation handle.
    /// Also used by startup recovery to resume agents after a restart.
    pub(crate) fn spawn_loop(self: &Arc<Self>, agent_id: String) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
        let orch = Arc::clone(self);
        let loop_id = agent_id.clone();
        let task = tokio::spawn(async move {
            // Wait for registration so a fast-finishing loop cannot remove
            // its handle before it exists.
            let _ = ready_rx.await;
            orch.run_queue_loop(loop_id, cancel_rx).await;
        });
        self.registry.insert(&agent_id, cancel_tx, task);
        let _ = ready_tx.send(());
    }

    /// Pauses a running agent: the pending continuation is cancelled and the
    /// loop exits after re-checking status.
    pub async fn pause_agent(&self, agent_id: &str) -> Result<(), OrchestratorError> {
        let mut agent = self.load_agent(agent_id).await?;
        if agent.status == AgentStatus::Completed {
            return Err(OrchestratorError::AgentCompleted(agent_id.to_string()));
        }
        if agent.status == AgentStatus::Running {
            agent.status = AgentStatus::Paused;
            self.save_agent(agent.clone()).await?;
        }
        self.registry.cancel(agent_id);

        self.audit(
            agent.id.clone(),
            AuditPayload::AgentStatusChanged {
                agent_id: agent.id.clone(),
                status: agent.status,
            },
        )
        .await;
        self.publish(HubEvent::Status {
            agent_id: agent.id.clone(),
            status: agent.status,
            stats: agent.stats.clone(),
        });
        tracing::info!(agent_id, "paused agent");
        Ok(())
    }

    /// Stops an agent for good: cancels any pending continuation and forces
    /// the step machine through `completed`.
    pub async fn stop_agent(&self, agent_id: &str) -> Result<(), OrchestratorError> {
        self.registry.cancel(agent_id);
        let mut agent = self.load_agent(agent_id).await?;
        if agent.status == AgentStatus::Completed {
            return Ok(());
        }
        self.mark_completed(&mut agent).await?;
        tracing::info!(agent_id, "stopped agent");
        Ok(())
    }

    /// Moves the agent to `completed`: along the legal edge when one
    /// exists, forced otherwise (an operator stop can land mid-call).
    async fn mark_completed(&self, agent: &mut AgentRecord) -> Result<(), OrchestratorError> {
        let from = agent.current_step;
        if from != Step::Completed {
            let forced = !dialflow_steps::is_valid_transition(from, Step::Completed);
            agent.current_step = Step::Completed;
            self.audit(
                agent.id.clone(),
                AuditPayload::StepChanged {
                    agent_id: agent.id.clone(),
                    from_step: from,
                    to_step: Step::Completed,
                },
            )
            .await;
            self.publish(HubEvent::StepChange {
                agent_id: agent.id.clone(),
                from_step: from,
                to_step: Step::Completed,
                data: forced.then(|| serde_json::json!({ "forced": true })),
            });
        }

        agent.status = AgentStatus::Completed;
        self.save_agent(agent.clone()).await?;
        self.audit(
            agent.id.clone(),
            AuditPayload::AgentStatusChanged {
                agent_id: agent.id.clone(),
                status: AgentStatus::Completed,
            },
        )
        .await;
        self.publish(HubEvent::Status {
            agent_id: agent.id.clone(),
            status: AgentStatus::Completed,
            stats: agent.stats.clone(),
        });
        Ok(())
    }

    /// The queue-processing loop: one lead end-to-end, then a durable,
    /// cancellable delay before the next. A per-lead failure converts into a
    /// `skipped` outcome and never aborts the remaining queue.
    async fn run_queue_loop(self: Arc<Self>, agent_id: String, mut cancel: watch::Receiver<bool>) {
        loop {
            if *cancel.borrow() {
                break;
            }
            let mut agent = match self.load_agent(&agent_id).await {
                Ok(agent) => agent,
                Err(e) => {
                    tracing::error!(agent_id, "queue loop cannot load agent: {e}");
                    break;
                }
            };
            // Guard against the pause/stop race: a cancellation may have
            // landed after the check above but before this reload.
            if agent.status != AgentStatus::Running {
                break;
            }

            if agent.lead_queue.is_empty() || agent.stats.total_calls >= agent.config.max_calls {
                if let Err(e) = self.mark_completed(&mut agent).await {
                    tracing::error!(agent_id, "failed to complete agent: {e}");
                }
                break;
            }

            // A pause or crash can leave the step machine mid-call; walk it
            // back to a lead boundary before selecting the next lead.
            if !matches!(agent.current_step, Step::Idle | Step::NextLead) {
                self.route_failure_steps(&mut agent).await;
                if matches!(agent.current_step, Step::Skipped | Step::NotesGenerated) {
                    if let Err(e) = self.transition(&mut agent, Step::NextLead, None).await {
                        tracing::error!(agent_id, "step normalization failed: {e}");
                        break;
                    }
                }
            }

            let lead_id = agent.lead_queue[0].clone();
            let (outcome, duration_secs) =
                match self.process_one_lead(&mut agent, &lead_id, &mut cancel).await {
                    Ok(result) => result,
                    Err(OrchestratorError::Cancelled) => break,
                    Err(e) => {
                        let reason = e.to_string();
                        tracing::warn!(agent_id, lead_id, "lead failed, skipping: {reason}");
                        self.publish_log(
                            &agent_id,
                            LogLevel::Error,
                            format!("lead {lead_id} skipped: {reason}"),
                        );
                        self.audit(
                            agent.id.clone(),
                            AuditPayload::LeadSkipped {
                                agent_id: agent.id.clone(),
                                lead_id: lead_id.clone(),
                                reason,
                            },
                        )
                        .await;
                        self.route_failure_steps(&mut agent).await;
                        (CallOutcome::NoAnswer, 0)
                    }
                };

            // Record the finished lead: out of the queue, into the
            // append-only log, exactly one of the two.
            agent.lead_queue.retain(|id| id != &lead_id);
            agent.completed_leads.push(CompletedLead {
                lead_id: lead_id.clone(),
                outcome,
                rate: None,
                timestamp: dialflow_db::to_sql_datetime(chrono::Utc::now()),
            });
            agent.stats.record(outcome, duration_secs);
            if let Err(e) = self.save_progress(agent.clone()).await {
                tracing::error!(agent_id, "failed to persist lead result: {e}");
                break;
            }
            self.publish(HubEvent::Status {
                agent_id: agent.id.clone(),
                status: agent.status,
                stats: agent.stats.clone(),
            });

            if matches!(agent.current_step, Step::Skipped | Step::NotesGenerated) {
                if let Err(e) = self.transition(&mut agent, Step::NextLead, None).await {
                    tracing::error!(agent_id, "next-lead transition failed: {e}");
                    break;
                }
            }

            if agent.lead_queue.is_empty() {
                continue; // completes on the next iteration
            }

            // Durable continuation: the delay is recorded before sleeping so
            // a crash cannot lose the pending next-lead work.
            let delay = Duration::from_millis(agent.config.delay_between_calls_ms);
            let action_id = Uuid::new_v4().to_string();
            let action = ScheduledAction {
                id: action_id.clone(),
                kind: "process-next-lead".to_string(),
                agent_id: Some(agent_id.clone()),
                call_id: None,
                due_at: dialflow_db::to_sql_datetime(
                    chrono::Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64),
                ),
                created_at: String::new(),
                completed_at: None,
            };
            if let Err(e) = with_conn(&self.pool, move |conn| {
                dialflow_db::create_scheduled_action(conn, &action)
            })
            .await
            {
                tracing::warn!(agent_id, "failed to record continuation: {e}");
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.changed() => {}
            }

            let completed_id = action_id.clone();
            if let Err(e) = with_conn(&self.pool, move |conn| {
                dialflow_db::complete_scheduled_action(conn, &completed_id)
            })
            .await
            {
                tracing::warn!(agent_id, "failed to complete continuation: {e}");
            }
        }

        self.registry.remove(&agent_id);
        tracing::debug!(agent_id, "queue loop exited");
    }

    /// Walks the legal failure edges from wherever the lead got stuck, so
    /// the step machine lands on `skipped` (or `notes-generated` for a call
    /// that had already been answered) without ever taking an illegal edge.
    async fn route_failure_steps(&self, agent: &mut AgentRecord) {
        loop {
            let next = match agent.current_step {
                Step::Idle | Step::NextLead => Step::LeadSelected,
                Step::LeadSelected => Step::Dialing,
                Step::Dialing => Step::Failed,
                Step::NoAnswer | Step::Busy | Step::Failed => Step::Skipped,
                Step::Speaking
                | Step::Discovery
                | Step::ObjectionHandling
                | Step::Negotiating => Step::Ended,
                Step::Ended | Step::Booked | Step::FollowUp | Step::Rejected => {
                    Step::NotesGenerated
                }
                Step::Skipped | Step::NotesGenerated | Step::Completed => break,
            };
            if let Err(e) = self.transition(agent, next, None).await {
                tracing::error!(agent_id = %agent.id, "failure routing stopped: {e}");
                break;
            }
            if matches!(agent.current_step, Step::Skipped | Step::NotesGenerated) {
                break;
            }
        }
    }

    async fn update_call_status(
        &self,
        call_id: &str,
        status: CallStatus,
        reason: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let id = call_id.to_string();
        with_conn(&self.pool, move |conn| {
            dialflow_db::update_call_status(conn, &id, status, reason.as_deref())
        })
        .await
    }

    /// One lead end-to-end: compliance check, dial, bounded cancellable
    /// completion poll, outcome classification, persistence.
    async fn process_one_lead(
        &self,
        agent: &mut AgentRecord,
        lead_id: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(CallOutcome, u32), OrchestratorError> {
        self.transition(
            agent,
            Step::LeadSelected,
            Some(serde_json::json!({ "leadId": lead_id })),
        )
        .await?;

        let id = lead_id.to_string();
        let lead = with_conn(&self.pool, move |conn| dialflow_db::get_lead(conn, &id)).await?;
        let phone = lead
            .phone
            .clone()
            .filter(|p| !normalize_phone(p).is_empty())
            .ok_or_else(|| OrchestratorError::LeadUnusable {
                lead_id: lead_id.to_string(),
                reason: "no usable phone number".to_string(),
            })?;

        // Consulted before every dial, not just at spawn: the list may have
        // grown since the queue snapshot was taken.
        if self.dnc.is_blocked(&phone).await? {
            return Err(OrchestratorError::LeadUnusable {
                lead_id: lead_id.to_string(),
                reason: "number is on the do-not-call list".to_string(),
            });
        }

        self.publish_log(
            &agent.id,
            LogLevel::Info,
            format!("calling {} ({})", lead.name, phone),
        );

        let call_id = Uuid::new_v4().to_string();
        let params = CreateCallParams {
            id: call_id.clone(),
            lead_id: Some(lead_id.to_string()),
            agent_id: Some(agent.id.clone()),
            direction: CallDirection::Outbound,
            status: CallStatus::Queued,
            phone: phone.clone(),
            scheduled_at: None,
        };
        with_conn(&self.pool, move |conn| dialflow_db::create_call(conn, &params)).await?;
        self.publish(HubEvent::CallUpdate {
            call_id: call_id.clone(),
            status: CallStatus::Queued,
            duration_secs: None,
        });

        self.transition(agent, Step::Dialing, None).await?;

        let context = DialContext {
            call_id: call_id.clone(),
            agent_id: Some(agent.id.clone()),
            lead_id: Some(lead_id.to_string()),
        };
        let dial = match self.telephony.initiate_call(&phone, &context).await {
            Ok(dial) => dial,
            Err(e) => {
                let reason = e.to_string();
                self.update_call_status(&call_id, CallStatus::Failed, Some(reason.clone()))
                    .await?;
                self.audit(
                    call_id.clone(),
                    AuditPayload::CallFailed {
                        call_id: call_id.clone(),
                        reason,
                    },
                )
                .await;
                self.publish(HubEvent::CallUpdate {
                    call_id: call_id.clone(),
                    status: CallStatus::Failed,
                    duration_secs: None,
                });
                return Err(e.into());
            }
        };

        let provider_call_id = dial.provider_call_id.clone();
        {
            let id = call_id.clone();
            let pid = provider_call_id.clone();
            let status = dial.status;
            with_conn(&self.pool, move |conn| {
                dialflow_db::set_provider_call(conn, &id, &pid, status)
            })
            .await?;
        }
        self.publish(HubEvent::CallUpdate {
            call_id: call_id.clone(),
            status: dial.status,
            duration_secs: None,
        });

        // Bounded, cancellable completion poll.
        let deadline = Instant::now() + self.config.max_poll_wait;
        let mut answered = false;
        let provider_status = loop {
            match self.telephony.get_call_status(&provider_call_id).await {
                Ok(status) => match status.status {
                    CallStatus::InProgress => {
                        if !answered {
                            answered = true;
                            self.transition(agent, Step::Speaking, None).await?;
                            self.update_call_status(&call_id, CallStatus::InProgress, None)
                                .await?;
                            self.publish(HubEvent::CallUpdate {
                                call_id: call_id.clone(),
                                status: CallStatus::InProgress,
                                duration_secs: None,
                            });
                        }
                    }
                    CallStatus::Completed | CallStatus::Failed | CallStatus::Cancelled => {
                        break status;
                    }
                    _ => {}
                },
                Err(e) => {
                    tracing::warn!(call_id, "status poll failed, retrying: {e}");
                }
            }

            if Instant::now() >= deadline {
                let _ = self.telephony.end_call(&provider_call_id).await;
                let reason = format!(
                    "timed out after {}s waiting for completion",
                    self.config.max_poll_wait.as_secs()
                );
                self.update_call_status(&call_id, CallStatus::Failed, Some(reason.clone()))
                    .await?;
                self.audit(
                    call_id.clone(),
                    AuditPayload::CallFailed {
                        call_id: call_id.clone(),
                        reason: reason.clone(),
                    },
                )
                .await;
                self.publish(HubEvent::CallUpdate {
                    call_id: call_id.clone(),
                    status: CallStatus::Failed,
                    duration_secs: None,
                });
                return Err(OrchestratorError::LeadUnusable {
                    lead_id: lead_id.to_string(),
                    reason,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.changed() => {}
            }
            if *cancel.borrow() {
                // A pause/stop cancels the in-flight poll loop as well.
                let _ = self.telephony.end_call(&provider_call_id).await;
                self.update_call_status(
                    &call_id,
                    CallStatus::Cancelled,
                    Some("agent paused or stopped".to_string()),
                )
                .await?;
                self.publish(HubEvent::CallUpdate {
                    call_id: call_id.clone(),
                    status: CallStatus::Cancelled,
                    duration_secs: None,
                });
                return Err(OrchestratorError::Cancelled);
            }
        };

        match provider_status.status {
            CallStatus::Failed | CallStatus::Cancelled => {
                let reason = "provider reported the call failed".to_string();
                self.update_call_status(&call_id, CallStatus::Failed, Some(reason.clone()))
                    .await?;
                self.audit(
                    call_id.clone(),
                    AuditPayload::CallFailed {
                        call_id: call_id.clone(),
                        reason: reason.clone(),
                    },
                )
                .await;
                self.publish(HubEvent::CallUpdate {
                    call_id: call_id.clone(),
                    status: CallStatus::Failed,
                    duration_secs: None,
                });
                Err(OrchestratorError::LeadUnusable {
                    lead_id: lead_id.to_string(),
                    reason,
                })
            }
            _ => {
                self.finalize_completed_call(
                    agent,
                    lead_id,
                    &call_id,
                    answered,
                    provider_status.duration_secs,
                    provider_status.transcript.as_deref(),
                    provider_status.recording_url.as_deref(),
                )
                .await
            }
        }
    }

    /// Classifies and records a call the provider reports as completed. The
    /// conversation engine's analysis (persisted by the audio transport)
    /// wins when present; otherwise a coarse fallback classifies from the
    /// provider's view alone.
    #[allow(clippy::too_many_arguments)]
    async fn finalize_completed_call(
        &self,
        agent: &mut AgentRecord,
        lead_id: &str,
        call_id: &str,
        answered: bool,
        duration_secs: Option<u32>,
        provider_transcript: Option<&str>,
        recording_url: Option<&str>,
    ) -> Result<(CallOutcome, u32), OrchestratorError> {
        let id = call_id.to_string();
        let call = with_conn(&self.pool, move |conn| dialflow_db::get_call(conn, &id)).await?;

        let duration = duration_secs.or(call.duration_secs).unwrap_or(0);
        let outcome = call.outcome.unwrap_or(if !answered && duration == 0 {
            CallOutcome::NoAnswer
        } else {
            CallOutcome::Voicemail
        });

        // Walk the step machine along the edges this outcome implies.
        if answered {
            match outcome {
                CallOutcome::Booked => {
                    self.transition(agent, Step::Negotiating, None).await?;
                    self.transition(agent, Step::Booked, None).await?;
                }
                CallOutcome::FollowUp | CallOutcome::Callback => {
                    self.transition(agent, Step::Negotiating, None).await?;
                    self.transition(agent, Step::FollowUp, None).await?;
                }
                CallOutcome::NotInterested => {
                    self.transition(agent, Step::Negotiating, None).await?;
                    self.transition(agent, Step::Rejected, None).await?;
                }
                CallOutcome::Voicemail | CallOutcome::NoAnswer => {
                    self.transition(agent, Step::Ended, None).await?;
                }
            }
            self.transition(agent, Step::NotesGenerated, None).await?;
        } else {
            self.transition(agent, Step::NoAnswer, None).await?;
            self.transition(agent, Step::Skipped, None).await?;
        }

        let transcription = if agent.config.auto_transcribe {
            provider_transcript.filter(|_| call.transcription.is_none())
        } else {
            None
        };
        let summary = if call.summary.is_none() {
            Some(format!(
                "Outbound call, {duration}s, outcome: {}",
                outcome.as_str()
            ))
        } else {
            None
        };

        {
            let id = call_id.to_string();
            let transcription = transcription.map(str::to_string);
            let summary = summary.clone();
            let recording_url = recording_url.map(str::to_string);
            with_conn(&self.pool, move |conn| {
                dialflow_db::record_call_result(
                    conn,
                    &id,
                    CallStatus::Completed,
                    outcome,
                    Some(duration),
                    transcription.as_deref(),
                    summary.as_deref(),
                    None,
                    recording_url.as_deref(),
                )
            })
            .await?;
        }

        self.audit(
            call_id.to_string(),
            AuditPayload::OutcomeRecorded {
                call_id: call_id.to_string(),
                lead_id: Some(lead_id.to_string()),
                outcome,
                duration_secs: Some(duration),
            },
        )
        .await;
        self.publish(HubEvent::CallUpdate {
            call_id: call_id.to_string(),
            status: CallStatus::Completed,
            duration_secs: Some(duration),
        });
        self.publish_log(
            &agent.id,
            LogLevel::Info,
            format!("lead {lead_id} finished: {}", outcome.as_str()),
        );

        Ok((outcome, duration))
    }

    /// Normalizes a raw telephony webhook payload through the adapter.
    pub fn telephony_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<dialflow_adapters::WebhookEvent, OrchestratorError> {
        self.telephony.handle_webhook(payload).map_err(Into::into)
    }

    /// Dials one due scheduled call. A failure marks that call failed and
    /// leaves the rest of the batch untouched.
    pub(crate) async fn dial_scheduled(
        &self,
        call: &dialflow_db::Call,
    ) -> Result<(), OrchestratorError> {
        let context = DialContext {
            call_id: call.id.clone(),
            agent_id: call.agent_id.clone(),
            lead_id: call.lead_id.clone(),
        };
        match self.telephony.initiate_call(&call.phone, &context).await {
            Ok(dial) => {
                let id = call.id.clone();
                let pid = dial.provider_call_id.clone();
                let status = dial.status;
                with_conn(&self.pool, move |conn| {
                    dialflow_db::set_provider_call(conn, &id, &pid, status)
                })
                .await?;
                self.publish(HubEvent::CallUpdate {
                    call_id: call.id.clone(),
                    status: dial.status,
                    duration_secs: None,
                });
                Ok(())
            }
            Err(e) => {
                let reason = format!("scheduled dial failed: {e}");
                self.update_call_status(&call.id, CallStatus::Failed, Some(reason.clone()))
                    .await?;
                self.audit(
                    call.id.clone(),
                    AuditPayload::CallFailed {
                        call_id: call.id.clone(),
                        reason,
                    },
                )
                .await;
                self.publish(HubEvent::CallUpdate {
                    call_id: call.id.clone(),
                    status: CallStatus::Failed,
                    duration_secs: None,
                });
                Err(e.into())
            }
        }
    }
}
