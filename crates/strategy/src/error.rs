use sentinel_core::ConfigError;
use sentinel_ports::{EngineError, LlmError, ScanError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Recommendation not found: {0}")]
    UnknownRecommendation(String),

    #[error("Recommendation {id} is already {status}")]
    NotPending { id: String, status: &'static str },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<Error> for EngineError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(_) | Error::Serialization(_) | Error::NotPending { .. } => {
                EngineError::Validation(e.to_string())
            }
            Error::UnknownRecommendation(_) => EngineError::Validation(e.to_string()),
            Error::Llm(_) | Error::Scan(_) => EngineError::Unavailable(e.to_string()),
        }
    }
}
