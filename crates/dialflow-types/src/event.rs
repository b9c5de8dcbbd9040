//! Observer event payloads pushed through the broadcast hub.
//!
//! Events use a tagged envelope with camelCase field names to match the
//! front-end frame types; the tag values are the protocol's event names.

use crate::step::Step;
use crate::{AgentStats, AgentStatus, CallStatus};
use serde::{Deserialize, Serialize};

/// Severity of a `log` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// An event pushed to subscribed observers.
///
/// Events carrying an agent id are delivered only to observers subscribed to
/// that agent (or to `*`); events without one (pure call updates) go to every
/// connected observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    /// The agent's step machine moved along a legal edge.
    #[serde(rename = "step-change", rename_all = "camelCase")]
    StepChange {
        agent_id: String,
        from_step: Step,
        to_step: Step,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    /// The agent's lifecycle status or counters changed.
    #[serde(rename = "status", rename_all = "camelCase")]
    Status {
        agent_id: String,
        status: AgentStatus,
        stats: AgentStats,
    },
    /// A call record changed state. No agent id: delivered to all observers.
    #[serde(rename = "call-update", rename_all = "camelCase")]
    CallUpdate {
        call_id: String,
        status: CallStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u32>,
    },
    /// A human-readable progress or error line for an agent.
    #[serde(rename = "log", rename_all = "camelCase")]
    Log {
        agent_id: String,
        message: String,
        level: LogLevel,
    },
}

impl HubEvent {
    /// The agent this event belongs to, if any. Used for subscription
    /// filtering in the hub.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::StepChange { agent_id, .. }
            | Self::Status { agent_id, .. }
            | Self::Log { agent_id, .. } => Some(agent_id),
            Self::CallUpdate { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_change_serializes_protocol_shape() {
        let event = HubEvent::StepChange {
            agent_id: "agent-1".to_string(),
            from_step: Step::Dialing,
            to_step: Step::Speaking,
            data: None,
        };

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "step-change");
        assert_eq!(json["agentId"], "agent-1");
        assert_eq!(json["fromStep"], "dialing");
        assert_eq!(json["toStep"], "speaking");
        assert!(json.get("agent_id").is_none(), "fields must be camelCase");
    }

    #[test]
    fn call_update_has_no_agent_id() {
        let event = HubEvent::CallUpdate {
            call_id: "call-1".to_string(),
            status: CallStatus::Completed,
            duration_secs: Some(42),
        };
        assert!(event.agent_id().is_none());

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "call-update");
        assert_eq!(json["callId"], "call-1");
        assert_eq!(json["durationSecs"], 42);
    }

    #[test]
    fn log_event_carries_level() {
        let event = HubEvent::Log {
            agent_id: "agent-9".to_string(),
            message: "dial failed".to_string(),
            level: LogLevel::Error,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["level"], "error");
        assert_eq!(event.agent_id(), Some("agent-9"));
    }
}
