use sentinel_core::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an exchange client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Order rejected for {symbol}: {reason}")]
    Rejected { symbol: String, reason: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ExchangeError {
    /// Whether retrying later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout { .. } | ExchangeError::Transport(_)
        )
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Failure reported by an LLM provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("LLM provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Unparseable LLM response: {0}")]
    InvalidResponse(String),
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Failure reported by a persistence collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure reported by the market scanner
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("No market data for {0}")]
    NoData(String),

    #[error("Scanner error: {0}")]
    Backend(String),
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// One failed item of a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Symbol, recommendation id, user id... whatever identifies the item
    pub key: String,
    pub message: String,
}

impl ItemError {
    pub fn new(key: impl Into<String>, message: impl ToString) -> Self {
        Self {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

/// Coarse error class, stable for transport mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unavailable,
    Exchange,
    RiskBlocked,
    PartialFailure,
}

/// Engine-level error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Bad input; the caller can correct it
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A dependency is not initialised or reachable; retry later
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Upstream rejection or timeout
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Circuit breaker or mutual-exclusion refusal; expected, not a defect
    #[error("Blocked by risk controls: {0}")]
    RiskBlocked(String),

    /// Bulk operation partially succeeded
    #[error("Partial failure: {succeeded} succeeded, {} failed", .failures.len())]
    PartialFailure {
        succeeded: usize,
        failures: Vec<ItemError>,
    },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
            EngineError::Exchange(_) => ErrorKind::Exchange,
            EngineError::RiskBlocked(_) => ErrorKind::RiskBlocked,
            EngineError::PartialFailure { .. } => ErrorKind::PartialFailure,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Unavailable(err.to_string())
    }
}

impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        EngineError::Unavailable(err.to_string())
    }
}

impl From<ScanError> for EngineError {
    fn from(err: ScanError) -> Self {
        EngineError::Unavailable(err.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_maps_to_validation() {
        let err: EngineError = ConfigError::UnknownParameter("foo".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_partial_failure_message_counts_items() {
        let err = EngineError::PartialFailure {
            succeeded: 2,
            failures: vec![ItemError::new("ETHUSDT", "rejected")],
        };
        assert_eq!(err.to_string(), "Partial failure: 2 succeeded, 1 failed");
    }

    #[test]
    fn test_timeouts_are_retryable() {
        let timeout = ExchangeError::Timeout {
            operation: "place_order".to_string(),
            after_ms: 10_000,
        };
        assert!(timeout.is_retryable());
        assert!(
            !ExchangeError::Rejected {
                symbol: "BTCUSDT".to_string(),
                reason: "reduce only".to_string()
            }
            .is_retryable()
        );
    }
}
