//! Audit layer for the Dialflow platform.
//!
//! Implements the append-only audit log: every step transition, recorded
//! outcome, per-lead failure, scheduler action, and compliance change is
//! written here so operators can reconstruct what an agent did and why a
//! call ended the way it did. Observer `log` events are best-effort; this
//! log is the durable record.
//!
//! # Event domains
//!
//! | Domain | Example events |
//! |--------|---------------|
//! | `AGENT` | `AGENT_SPAWNED`, `STEP_CHANGED`, `LEAD_SKIPPED` |
//! | `CALL` | `OUTCOME_RECORDED`, `CALL_FAILED` |
//! | `SCHEDULER` | `CALL_SCHEDULED`, `CALL_RECONCILED` |
//! | `COMPLIANCE` | `DNC_ADDED`, `DNC_REMOVED` |

mod error;
mod event;
mod store;

pub use error::AuditError;
pub use event::{AuditDomain, AuditEvent, AuditPayload, ParseAuditDomainError};
pub use store::{emit_event, query_events, AuditFilter};

#[cfg(test)]
mod tests;
