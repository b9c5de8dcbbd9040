use thiserror::Error;

/// Errors surfaced by the conversation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Adapter(#[from] dialflow_adapters::AdapterError),

    #[error("engine already ended")]
    AlreadyEnded,

    #[error("transport channel closed")]
    TransportClosed,
}
