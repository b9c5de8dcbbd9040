use thiserror::Error;

/// Errors surfaced by provider adapters.
///
/// All variants are treated as transient provider errors by callers: they
/// are recorded against the affected call or lead and never crash a loop.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("telephony error: {0}")]
    Telephony(String),

    #[error("speech-to-text error: {0}")]
    Stt(String),

    #[error("text-to-speech error: {0}")]
    Tts(String),

    #[error("language-model error: {0}")]
    Llm(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed provider payload: {0}")]
    Payload(String),
}
