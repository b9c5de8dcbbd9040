//! The per-call conversation engine.
//!
//! One [`ConversationEngine`] instance drives a single live call: it owns
//! turn-taking, the STT → LLM → TTS pipeline, barge-in handling, and outcome
//! classification. The audio transport feeds inbound frames to
//! [`ConversationEngine::process_audio`] and receives outbound audio and
//! control signals on the engine's event channel.
//!
//! The engine is in-memory only: it is created when the transport sees a
//! call start, never shared across calls, and dropped when the call ends.

mod classify;
mod error;
mod session;

pub use classify::{final_outcome, is_opt_out, OutcomeDetector, OutcomeRule};
pub use error::EngineError;
pub use session::{CallReport, ConversationEngine, EngineConfig, EngineEvent, EngineState};
