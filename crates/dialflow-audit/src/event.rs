//! Audit domain, payload, and record types.

use dialflow_types::{AgentStatus, CallOutcome, Step};
use serde::{Deserialize, Serialize};

/// Audit event domains. Each domain groups related event types for
/// filtering and review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditDomain {
    /// Agent lifecycle: spawn, step transitions, skipped leads.
    #[serde(rename = "AGENT")]
    Agent,
    /// Call results: outcomes and failures.
    #[serde(rename = "CALL")]
    Call,
    /// Scheduler and reconciler actions.
    #[serde(rename = "SCHEDULER")]
    Scheduler,
    /// DNC list changes.
    #[serde(rename = "COMPLIANCE")]
    Compliance,
}

impl AuditDomain {
    /// Returns the canonical string label for this domain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "AGENT",
            Self::Call => "CALL",
            Self::Scheduler => "SCHEDULER",
            Self::Compliance => "COMPLIANCE",
        }
    }
}

impl std::fmt::Display for AuditDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditDomain {
    type Err = ParseAuditDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AGENT" => Ok(Self::Agent),
            "CALL" => Ok(Self::Call),
            "SCHEDULER" => Ok(Self::Scheduler),
            "COMPLIANCE" => Ok(Self::Compliance),
            _ => Err(ParseAuditDomainError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown audit domain string.
#[derive(Debug, Clone)]
pub struct ParseAuditDomainError(pub String);

impl std::fmt::Display for ParseAuditDomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown audit domain: {}", self.0)
    }
}

impl std::error::Error for ParseAuditDomainError {}

/// Structured payloads for each audit event type.
///
/// Payloads are serialised to JSON and stored in the `payload_json` column
/// of the `audit_log` table. Each variant corresponds to an `event_type`
/// string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditPayload {
    // ── Agent domain ─────────────────────────────────────────────────
    /// An agent was created with a queue snapshot.
    AgentSpawned {
        agent_id: String,
        queued_leads: usize,
    },

    /// An agent's lifecycle status changed.
    AgentStatusChanged {
        agent_id: String,
        status: AgentStatus,
    },

    /// The step machine moved along a legal edge.
    StepChanged {
        agent_id: String,
        from_step: Step,
        to_step: Step,
    },

    /// A lead was skipped after a per-lead failure.
    LeadSkipped {
        agent_id: String,
        lead_id: String,
        reason: String,
    },

    // ── Call domain ──────────────────────────────────────────────────
    /// A completed call's classified outcome was persisted.
    OutcomeRecorded {
        call_id: String,
        lead_id: Option<String>,
        outcome: CallOutcome,
        duration_secs: Option<u32>,
    },

    /// A call failed with a reason (dial error, poll timeout).
    CallFailed { call_id: String, reason: String },

    // ── Scheduler domain ─────────────────────────────────────────────
    /// A call was durably scheduled for a future due time.
    CallScheduled { call_id: String, due_at: String },

    /// The reconciler repaired a call stuck in an indeterminate state.
    CallReconciled { call_id: String, reason: String },

    // ── Compliance domain ────────────────────────────────────────────
    /// A number was added to the DNC list.
    DncAdded { phone: String },

    /// A number was removed from the DNC list.
    DncRemoved { phone: String },
}

impl AuditPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentSpawned { .. } => "AGENT_SPAWNED",
            Self::AgentStatusChanged { .. } => "AGENT_STATUS_CHANGED",
            Self::StepChanged { .. } => "STEP_CHANGED",
            Self::LeadSkipped { .. } => "LEAD_SKIPPED",
            Self::OutcomeRecorded { .. } => "OUTCOME_RECORDED",
            Self::CallFailed { .. } => "CALL_FAILED",
            Self::CallScheduled { .. } => "CALL_SCHEDULED",
            Self::CallReconciled { .. } => "CALL_RECONCILED",
            Self::DncAdded { .. } => "DNC_ADDED",
            Self::DncRemoved { .. } => "DNC_REMOVED",
        }
    }

    /// Returns the domain for this payload.
    pub fn domain(&self) -> AuditDomain {
        match self {
            Self::AgentSpawned { .. }
            | Self::AgentStatusChanged { .. }
            | Self::StepChanged { .. }
            | Self::LeadSkipped { .. } => AuditDomain::Agent,
            Self::OutcomeRecorded { .. } | Self::CallFailed { .. } => AuditDomain::Call,
            Self::CallScheduled { .. } | Self::CallReconciled { .. } => AuditDomain::Scheduler,
            Self::DncAdded { .. } | Self::DncRemoved { .. } => AuditDomain::Compliance,
        }
    }
}

/// A single row from the `audit_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Auto-incremented row ID.
    pub id: i64,
    /// The event domain (e.g. `AGENT`, `CALL`).
    pub domain: String,
    /// The specific event type (e.g. `STEP_CHANGED`).
    pub event_type: String,
    /// The identifier of the entity involved.
    pub entity_id: String,
    /// Monotonically increasing sequence number within the domain.
    pub seq: i64,
    /// The structured event payload as a JSON string.
    pub payload_json: String,
    /// Timestamp of when the event occurred.
    pub occurred_at: String,
}
