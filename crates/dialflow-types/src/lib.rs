//! Shared types and constants for the Dialflow platform.
//!
//! This crate provides the foundational types used across all Dialflow
//! crates: the call-lifecycle [`Step`] enum, agent and call status enums,
//! the classified [`CallOutcome`] with its explicit precedence order, agent
//! configuration/statistics structs, and the observer event payloads pushed
//! through the broadcast hub.
//!
//! No crate in the workspace depends on anything *except* `dialflow-types`
//! for cross-cutting type definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

use serde::{Deserialize, Serialize};

mod event;
mod step;

pub use event::{HubEvent, LogLevel};
pub use step::Step;

/// Lifecycle status of an agent (one queue-driven run through a set of leads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Created but not yet started.
    Idle,
    /// The queue-processing loop is active.
    Running,
    /// Paused by the operator; the pending continuation is cancelled.
    Paused,
    /// Terminal: the queue drained or the agent was stopped.
    Completed,
}

impl AgentStatus {
    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    /// Attempts to parse a status from its canonical label.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Provider-facing status of a single call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    /// Accepted locally, dial not yet confirmed by the provider.
    Queued,
    /// The provider reports the remote leg is ringing.
    Ringing,
    /// A live conversation is in progress.
    InProgress,
    /// The call finished normally.
    Completed,
    /// The call failed (dial error, timeout, reconciler repair).
    Failed,
    /// Cancelled before it was placed.
    Cancelled,
    /// Durably scheduled for a future due time.
    Scheduled,
}

impl CallStatus {
    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Scheduled => "scheduled",
        }
    }

    /// Attempts to parse a status from its canonical label.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "ringing" => Some(Self::Ringing),
            "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }

    /// True when the call can no longer change on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Direction of a call leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outbound,
    Inbound,
}

impl CallDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "outbound" => Some(Self::Outbound),
            "inbound" => Some(Self::Inbound),
            _ => None,
        }
    }
}

/// Classified result of a completed call.
///
/// Outcomes form an explicit total order by strength; outcome detection may
/// upgrade along this order during a call but never downgrade. A stronger
/// signal heard early (e.g. a pricing question) survives later neutral talk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    /// A meeting or appointment was booked.
    Booked,
    /// The lead asked to be called back at a specific time.
    Callback,
    /// Interest detected; worth a follow-up.
    FollowUp,
    /// The lead declined or opted out.
    NotInterested,
    /// Nobody spoke; the call hit an answering machine.
    Voicemail,
    /// The dial never connected.
    NoAnswer,
}

impl CallOutcome {
    /// Returns the canonical string label for this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::Callback => "callback",
            Self::FollowUp => "follow-up",
            Self::NotInterested => "not-interested",
            Self::Voicemail => "voicemail",
            Self::NoAnswer => "no-answer",
        }
    }

    /// Attempts to parse an outcome from its canonical label.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "booked" => Some(Self::Booked),
            "callback" => Some(Self::Callback),
            "follow-up" => Some(Self::FollowUp),
            "not-interested" => Some(Self::NotInterested),
            "voicemail" => Some(Self::Voicemail),
            "no-answer" => Some(Self::NoAnswer),
            _ => None,
        }
    }

    /// Position in the precedence order. Higher wins.
    ///
    /// `booked > callback > follow-up > not-interested > voicemail > no-answer`
    pub fn strength(self) -> u8 {
        match self {
            Self::Booked => 5,
            Self::Callback => 4,
            Self::FollowUp => 3,
            Self::NotInterested => 2,
            Self::Voicemail => 1,
            Self::NoAnswer => 0,
        }
    }

    /// True when replacing `current` with `self` is an upgrade (or there is
    /// no current outcome yet).
    pub fn upgrades(self, current: Option<CallOutcome>) -> bool {
        match current {
            None => true,
            Some(existing) => self.strength() > existing.strength(),
        }
    }
}

/// Recognized per-agent configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Voice profile passed to the TTS adapter.
    pub voice_id: String,
    /// Model identifier passed to the LLM adapter.
    pub llm_model: String,
    /// Hard cap on the number of calls this agent may place.
    pub max_calls: u32,
    /// Delay between consecutive leads, in milliseconds.
    pub delay_between_calls_ms: u64,
    /// Whether completed calls should be transcribed automatically.
    pub auto_transcribe: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            voice_id: "default".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            max_calls: 100,
            delay_between_calls_ms: 5_000,
            auto_transcribe: true,
        }
    }
}

/// Running counters for an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentStats {
    pub total_calls: u32,
    pub booked: u32,
    pub skipped: u32,
    pub avg_duration_secs: f64,
}

impl AgentStats {
    /// Folds one finished call into the counters, keeping the running
    /// average duration consistent with `total_calls`.
    pub fn record(&mut self, outcome: CallOutcome, duration_secs: u32) {
        let prior_total = f64::from(self.total_calls);
        self.total_calls += 1;
        match outcome {
            CallOutcome::Booked => self.booked += 1,
            CallOutcome::NoAnswer | CallOutcome::Voicemail => self.skipped += 1,
            _ => {}
        }
        self.avg_duration_secs =
            (self.avg_duration_secs * prior_total + f64::from(duration_secs))
                / f64::from(self.total_calls);
    }
}

/// One entry in an agent's append-only completed-leads log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedLead {
    pub lead_id: String,
    pub outcome: CallOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// ISO 8601 timestamp of when the lead finished.
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_status_round_trip() {
        for status in [
            CallStatus::Queued,
            CallStatus::Ringing,
            CallStatus::InProgress,
            CallStatus::Completed,
            CallStatus::Failed,
            CallStatus::Cancelled,
            CallStatus::Scheduled,
        ] {
            assert_eq!(CallStatus::from_str_opt(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::from_str_opt("bogus"), None);
    }

    #[test]
    fn agent_status_round_trip() {
        for status in [
            AgentStatus::Idle,
            AgentStatus::Running,
            AgentStatus::Paused,
            AgentStatus::Completed,
        ] {
            assert_eq!(AgentStatus::from_str_opt(status.as_str()), Some(status));
        }
    }

    #[test]
    fn outcome_precedence_is_total() {
        let ordered = [
            CallOutcome::NoAnswer,
            CallOutcome::Voicemail,
            CallOutcome::NotInterested,
            CallOutcome::FollowUp,
            CallOutcome::Callback,
            CallOutcome::Booked,
        ];
        for pair in ordered.windows(2) {
            assert!(
                pair[1].strength() > pair[0].strength(),
                "{:?} should outrank {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn outcome_upgrade_never_downgrades() {
        assert!(CallOutcome::FollowUp.upgrades(None));
        assert!(CallOutcome::Booked.upgrades(Some(CallOutcome::Callback)));
        assert!(!CallOutcome::NotInterested.upgrades(Some(CallOutcome::FollowUp)));
        assert!(!CallOutcome::FollowUp.upgrades(Some(CallOutcome::FollowUp)));
    }

    #[test]
    fn stats_record_keeps_running_average() {
        let mut stats = AgentStats::default();
        stats.record(CallOutcome::Booked, 60);
        stats.record(CallOutcome::NoAnswer, 0);
        stats.record(CallOutcome::FollowUp, 30);

        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.booked, 1);
        assert_eq!(stats.skipped, 1);
        assert!((stats.avg_duration_secs - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn outcome_serializes_kebab_case() {
        let json = serde_json::to_string(&CallOutcome::NotInterested).expect("serialize");
        assert_eq!(json, "\"not-interested\"");
    }
}
