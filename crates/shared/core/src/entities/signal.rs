use serde::{Deserialize, Serialize};

use super::{Direction, TradingMode, Verdict};
use crate::values::{Symbol, Timestamp};

/// What happened to a logged signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Executed,
    Rejected,
    Pending,
}

/// One entry of the per-tenant decision audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLogEntry {
    /// `{symbol}_{nanos}`
    pub id: String,
    pub symbol: Symbol,
    pub mode: TradingMode,
    pub direction: Direction,
    pub confidence: f64,
    pub verdict: Verdict,
    pub status: SignalStatus,
    pub rejection_reason: Option<String>,
    pub reasoning: String,
    pub timestamp: Timestamp,
}
