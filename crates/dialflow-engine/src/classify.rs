//! Keyword-based outcome classification.
//!
//! An ordered rule list scans each user utterance for interest, decline,
//! callback, and pricing signals. Detection is monotonic: a rule may
//! upgrade the detected outcome along the precedence order
//! (`booked > callback > follow-up > not-interested > voicemail > no-answer`)
//! but never downgrade it, so a strong signal heard early survives later
//! neutral talk. The rules are data, not code, so they can be tested and
//! extended independently of the pipeline.

use dialflow_types::CallOutcome;

/// One classification rule: any keyword hit maps to the outcome.
#[derive(Debug, Clone)]
pub struct OutcomeRule {
    pub keywords: &'static [&'static str],
    pub outcome: CallOutcome,
}

/// Phrases that explicitly end the conversation.
const OPT_OUT_PHRASES: &[&str] = &[
    "take me off your list",
    "remove me from your list",
    "take me off the list",
    "do not call me",
    "don't call me again",
    "stop calling me",
    "unsubscribe",
];

/// The default rule set, strongest signals first.
const DEFAULT_RULES: &[OutcomeRule] = &[
    OutcomeRule {
        keywords: &[
            "book a meeting",
            "schedule a call",
            "schedule a demo",
            "send the invite",
            "that works for me",
            "let's do it",
        ],
        outcome: CallOutcome::Booked,
    },
    OutcomeRule {
        keywords: &[
            "call me back",
            "call back later",
            "try me later",
            "call me tomorrow",
            "reach me next week",
        ],
        outcome: CallOutcome::Callback,
    },
    OutcomeRule {
        // Pricing questions are an interest signal.
        keywords: &[
            "how much",
            "pricing",
            "price",
            "what does it cost",
            "cost",
            "rates",
            "interested",
            "tell me more",
            "sounds good",
        ],
        outcome: CallOutcome::FollowUp,
    },
    OutcomeRule {
        keywords: &[
            "not interested",
            "no thanks",
            "no thank you",
            "stop calling",
            "don't call",
            "not a good fit",
        ],
        outcome: CallOutcome::NotInterested,
    },
];

/// Stateful detector for one call. Feed it every finalized user utterance.
#[derive(Debug, Clone)]
pub struct OutcomeDetector {
    rules: Vec<OutcomeRule>,
    detected: Option<CallOutcome>,
}

impl Default for OutcomeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeDetector {
    /// Creates a detector with the default rule set.
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
            detected: None,
        }
    }

    /// Creates a detector with a custom rule set.
    pub fn with_rules(rules: Vec<OutcomeRule>) -> Self {
        Self {
            rules,
            detected: None,
        }
    }

    /// Scans an utterance and upgrades the detected outcome if a stronger
    /// signal matches. Downgrades never happen.
    pub fn observe(&mut self, utterance: &str) {
        let lowered = utterance.to_lowercase();
        for rule in &self.rules {
            if rule.keywords.iter().any(|kw| lowered.contains(kw)) {
                if rule.outcome.upgrades(self.detected) {
                    self.detected = Some(rule.outcome);
                }
            }
        }
    }

    /// Registers an explicit opt-out: classified as `not-interested` unless
    /// something stronger was already detected.
    pub fn observe_opt_out(&mut self) {
        if CallOutcome::NotInterested.upgrades(self.detected) {
            self.detected = Some(CallOutcome::NotInterested);
        }
    }

    /// The strongest outcome detected so far.
    pub fn detected(&self) -> Option<CallOutcome> {
        self.detected
    }
}

/// True when the utterance contains explicit conversation-ending language.
pub fn is_opt_out(utterance: &str) -> bool {
    let lowered = utterance.to_lowercase();
    OPT_OUT_PHRASES.iter().any(|p| lowered.contains(p))
}

/// Computes the final outcome for a finished call: the explicit detection
/// when present, otherwise a heuristic on the user turn count.
pub fn final_outcome(detected: Option<CallOutcome>, user_turns: u32) -> CallOutcome {
    if let Some(outcome) = detected {
        return outcome;
    }
    match user_turns {
        0 | 1 => CallOutcome::Voicemail,
        2 | 3 => CallOutcome::NotInterested,
        _ => CallOutcome::FollowUp,
    }
}
