//! Sentinel Core Domain
//!
//! Pure domain types for the Sentinel autonomous futures engine.
//! This crate contains no async, no I/O, and is 100% unit testable.
//!
//! Configuration lives here as well: mode and circuit-breaker settings are
//! plain data with explicit patch types, merged by pure functions so every
//! partial update can be validated in isolation.

pub mod config;
pub mod entities;
pub mod values;

// Re-export commonly used types at crate root
pub use config::{
    CircuitBreakerConfig, CircuitBreakerPatch, ConfigError, DivergenceSettings, LlmGlobalConfig,
    ModeConfig, ModeConfigPatch, ModeLlmSettings, ModeParameter, TrailingSettings, UserSettings,
};
pub use entities::{
    // Decisions
    DecisionContext,
    Direction,
    // Positions
    Position,
    PositionSide,
    ProtectionState,
    RiskLevel,
    Side,
    // Signal audit trail
    SignalLogEntry,
    SignalStatus,
    SourceTag,
    TakeProfitLevel,
    TakeProfitStatus,
    // Scans
    TechnicalScan,
    TimeframeTrend,
    // Trades
    CloseReason,
    TradeOutcome,
    TradeResult,
    TradingMode,
    TrailingStop,
    Verdict,
};
pub use values::{Price, Quantity, Symbol, Timestamp, UserId};
