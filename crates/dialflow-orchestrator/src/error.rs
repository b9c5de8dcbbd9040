use thiserror::Error;

/// Errors produced by the orchestrator and its background passes.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No lead in the batch has a usable phone number.
    #[error("no eligible leads: every lead is missing a phone or is on the DNC list")]
    NoEligibleLeads,

    /// `start` was called on an agent whose loop is already running.
    #[error("agent {0} is already running")]
    AgentAlreadyRunning(String),

    /// The agent reached a terminal state and cannot be restarted.
    #[error("agent {0} has completed")]
    AgentCompleted(String),

    /// A pause/stop cancelled the in-flight work.
    #[error("cancelled")]
    Cancelled,

    /// A per-lead condition that converts into a skipped outcome.
    #[error("lead {lead_id}: {reason}")]
    LeadUnusable { lead_id: String, reason: String },

    #[error(transparent)]
    Step(#[from] dialflow_steps::StepError),

    #[error(transparent)]
    Store(#[from] dialflow_db::StoreError),

    #[error(transparent)]
    Compliance(#[from] dialflow_compliance::ComplianceError),

    #[error(transparent)]
    Adapter(#[from] dialflow_adapters::AdapterError),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("blocking task failed: {0}")]
    Join(String),
}
