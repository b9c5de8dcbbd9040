//! The call-lifecycle step enum.
//!
//! The transition table itself lives in `dialflow-steps`; this crate only
//! defines the variants and their wire labels so every other crate can name
//! steps without pulling in the state-machine logic.

use serde::{Deserialize, Serialize};

/// A named phase of a single call's lifecycle.
///
/// Steps are drawn from a fixed enum with a static transition table. The
/// orchestrator is the only writer of an agent's `current_step`; observers
/// receive each transition as a `step-change` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Idle,
    LeadSelected,
    Dialing,
    Speaking,
    NoAnswer,
    Busy,
    Failed,
    Discovery,
    ObjectionHandling,
    Negotiating,
    Ended,
    Booked,
    FollowUp,
    Rejected,
    NotesGenerated,
    Skipped,
    NextLead,
    Completed,
}

impl Step {
    /// Every step, in declaration order. Used to prove table totality.
    pub const ALL: [Step; 18] = [
        Step::Idle,
        Step::LeadSelected,
        Step::Dialing,
        Step::Speaking,
        Step::NoAnswer,
        Step::Busy,
        Step::Failed,
        Step::Discovery,
        Step::ObjectionHandling,
        Step::Negotiating,
        Step::Ended,
        Step::Booked,
        Step::FollowUp,
        Step::Rejected,
        Step::NotesGenerated,
        Step::Skipped,
        Step::NextLead,
        Step::Completed,
    ];

    /// Returns the canonical kebab-case label for this step.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::LeadSelected => "lead-selected",
            Self::Dialing => "dialing",
            Self::Speaking => "speaking",
            Self::NoAnswer => "no-answer",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::Discovery => "discovery",
            Self::ObjectionHandling => "objection-handling",
            Self::Negotiating => "negotiating",
            Self::Ended => "ended",
            Self::Booked => "booked",
            Self::FollowUp => "follow-up",
            Self::Rejected => "rejected",
            Self::NotesGenerated => "notes-generated",
            Self::Skipped => "skipped",
            Self::NextLead => "next-lead",
            Self::Completed => "completed",
        }
    }

    /// Attempts to parse a step from its canonical label.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|step| step.as_str() == s)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
