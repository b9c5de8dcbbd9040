//! The call-lifecycle step state machine.
//!
//! A pure lookup table of legal step transitions for one call's lifecycle;
//! no I/O. The orchestrator consults [`is_valid_transition`] before every
//! move and treats a rejection as a state-invariant violation: invalid
//! transitions are errors, never silently coerced.
//!
//! [`flow_graph`] produces a derived node/edge view for observers, marking
//! the edges leaving the current step as active so a front end can animate
//! them. The view is never authoritative state.

use dialflow_types::Step;
use serde::Serialize;
use thiserror::Error;

/// Error returned when a step transition is not in the static table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The requested transition is not a legal edge.
    #[error("invalid step transition: {from} -> {to}")]
    InvalidTransition { from: Step, to: Step },
}

/// Returns the allowed-next set for a step.
///
/// The table is total: every step has an entry, empty for the terminal
/// `completed` step.
pub fn allowed_next(from: Step) -> &'static [Step] {
    match from {
        Step::Idle => &[Step::LeadSelected],
        Step::LeadSelected => &[Step::Dialing],
        Step::Dialing => &[Step::Speaking, Step::NoAnswer, Step::Busy, Step::Failed],
        Step::Speaking => &[
            Step::Discovery,
            Step::ObjectionHandling,
            Step::Negotiating,
            Step::Ended,
        ],
        Step::Discovery => &[Step::ObjectionHandling, Step::Negotiating, Step::Ended],
        Step::ObjectionHandling => &[Step::Discovery, Step::Negotiating, Step::Ended],
        Step::Negotiating => &[Step::Booked, Step::FollowUp, Step::Rejected, Step::Ended],
        Step::Booked | Step::FollowUp | Step::Rejected | Step::Ended => &[Step::NotesGenerated],
        Step::NoAnswer | Step::Busy | Step::Failed => &[Step::Skipped],
        Step::Skipped | Step::NotesGenerated => &[Step::NextLead, Step::Completed],
        Step::NextLead => &[Step::LeadSelected, Step::Completed],
        Step::Completed => &[],
    }
}

/// True iff `to` is in the static allowed-next set for `from`.
pub fn is_valid_transition(from: Step, to: Step) -> bool {
    allowed_next(from).contains(&to)
}

/// Applies a transition, returning the new step or a typed rejection.
pub fn apply(from: Step, to: Step) -> Result<Step, StepError> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(StepError::InvalidTransition { from, to })
    }
}

/// A node in the derived flow-graph view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: Step,
    pub label: &'static str,
    /// True for the step the agent currently sits on.
    pub current: bool,
}

/// An edge in the derived flow-graph view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub from: Step,
    pub to: Step,
    /// True for edges leaving the current step; front ends animate these.
    pub active: bool,
}

/// The full node/edge view of the step machine for observers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

/// Generates the flow-graph view, marking edges out of `current` as active.
pub fn flow_graph(current: Step) -> FlowGraph {
    let nodes = Step::ALL
        .iter()
        .map(|&step| FlowNode {
            id: step,
            label: step.as_str(),
            current: step == current,
        })
        .collect();

    let mut edges = Vec::new();
    for &from in Step::ALL.iter() {
        for &to in allowed_next(from) {
            edges.push(FlowEdge {
                from,
                to,
                active: from == current,
            });
        }
    }

    FlowGraph { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_total() {
        // Every step must have an entry; terminal steps have empty sets.
        for step in Step::ALL {
            let next = allowed_next(step);
            if step == Step::Completed {
                assert!(next.is_empty(), "completed is terminal");
            }
            for &target in next {
                assert!(is_valid_transition(step, target));
            }
        }
    }

    #[test]
    fn validity_matches_table_exactly() {
        for from in Step::ALL {
            for to in Step::ALL {
                let expected = allowed_next(from).contains(&to);
                assert_eq!(
                    is_valid_transition(from, to),
                    expected,
                    "mismatch for {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn happy_path_through_a_booked_call() {
        let path = [
            Step::Idle,
            Step::LeadSelected,
            Step::Dialing,
            Step::Speaking,
            Step::Discovery,
            Step::Negotiating,
            Step::Booked,
            Step::NotesGenerated,
            Step::NextLead,
            Step::LeadSelected,
        ];
        for pair in path.windows(2) {
            assert!(
                is_valid_transition(pair[0], pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn failed_dial_path_reaches_completed() {
        let path = [Step::Dialing, Step::Failed, Step::Skipped, Step::Completed];
        for pair in path.windows(2) {
            assert!(is_valid_transition(pair[0], pair[1]));
        }
    }

    #[test]
    fn apply_rejects_illegal_edges() {
        assert_eq!(apply(Step::Dialing, Step::Speaking), Ok(Step::Speaking));
        let err = apply(Step::Idle, Step::Booked).expect_err("idle cannot book");
        assert_eq!(
            err,
            StepError::InvalidTransition {
                from: Step::Idle,
                to: Step::Booked
            }
        );
    }

    #[test]
    fn terminal_step_has_no_exits() {
        for to in Step::ALL {
            assert!(!is_valid_transition(Step::Completed, to));
        }
    }

    #[test]
    fn flow_graph_marks_active_edges() {
        let graph = flow_graph(Step::Dialing);

        assert_eq!(graph.nodes.len(), Step::ALL.len());
        let current: Vec<_> = graph.nodes.iter().filter(|n| n.current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, Step::Dialing);

        for edge in &graph.edges {
            assert_eq!(
                edge.active,
                edge.from == Step::Dialing,
                "only edges leaving the current step are active"
            );
        }
        let active = graph.edges.iter().filter(|e| e.active).count();
        assert_eq!(active, allowed_next(Step::Dialing).len());
    }

    #[test]
    fn flow_graph_serializes_camel_case() {
        let graph = flow_graph(Step::Idle);
        let json = serde_json::to_value(&graph).expect("serialize");
        let edge = &json["edges"][0];
        assert!(edge.get("from").is_some());
        assert!(edge.get("active").is_some());
    }
}
