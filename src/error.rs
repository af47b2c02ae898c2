use thiserror::Error;

/// Errors surfaced by the engine contract.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid team codes, dates, or game data; rejected before any model runs.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Every model failed or timed out for this matchup.
    #[error("prediction unavailable")]
    PredictionUnavailable,

    /// No season schedule is loaded, or the team is not part of it.
    #[error("ratings unavailable: {0}")]
    RatingsUnavailable(String),

    /// The completed game was already used for training.
    #[error("game {0} already processed")]
    AlreadyProcessed(String),

    /// State could not be saved. In-memory training results are kept and the
    /// save can be retried with `Engine::flush_state`.
    #[error("persistence failure (retryable): {0}")]
    Persistence(String),

    /// The caller abandoned a season simulation.
    #[error("simulation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Persistence(_))
    }
}

/// Failure of a single model for a single call. Never surfaced past the
/// ensemble; the model is excluded and the remaining weights renormalised.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("shape mismatch: expected {expected} inputs, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("non-finite output")]
    NonFinite,

    #[error("exceeded time budget of {0} ms")]
    TimedOut(u64),

    #[error("model task failed: {0}")]
    Panicked(String),
}
