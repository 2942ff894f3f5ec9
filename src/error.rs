use thiserror::Error;

/// Errors surfaced by the coaching core.
///
/// None of these are fatal: each is recoverable at the granularity of a single
/// turn or a session start.
#[derive(Debug, Error)]
pub enum CoachError {
    #[error("No model selected")]
    NoModelSelected,

    #[error("No AI models available. Please configure a model provider.")]
    NoModelsAvailable,

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("A coach response is already being generated")]
    TurnInFlight,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Chat API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoachError>;
