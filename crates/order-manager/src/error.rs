//! Order Manager errors

use sentinel_core::{ConfigError, ProtectionState};
use sentinel_ports::{EngineError, ExchangeError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("No tracked position for {0}")]
    UnknownPosition(String),

    #[error("Position already open for {0}")]
    DuplicatePosition(String),

    #[error("Illegal protection transition for {symbol}: {from} -> {to}")]
    InvalidTransition {
        symbol: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Job queue is shut down")]
    QueueClosed,
}

impl Error {
    pub fn invalid_transition(symbol: &str, from: ProtectionState, to: ProtectionState) -> Self {
        Error::InvalidTransition {
            symbol: symbol.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        }
    }
}

impl From<Error> for EngineError {
    fn from(err: Error) -> Self {
        match err {
            Error::Exchange(e) => EngineError::Exchange(e),
            Error::UnknownPosition(_) | Error::DuplicatePosition(_) | Error::Invalid(_) => {
                EngineError::Validation(err.to_string())
            }
            Error::Config(e) => e.into(),
            Error::InvalidTransition { .. } => EngineError::Validation(err.to_string()),
            Error::QueueClosed => EngineError::Unavailable(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
