//! Circuit breaker state types

use rust_decimal::Decimal;
use sentinel_core::Timestamp;
use sentinel_ports::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Tripped; no new trades until cooldown ends
    Open,
    /// Cooldown over; the next outcome decides between Closed and Open
    HalfOpen,
}

impl CircuitState {
    /// Check if new trades may be considered at all
    pub fn allows_new_trades(&self) -> bool {
        !matches!(self, CircuitState::Open)
    }
}

/// Condition that tripped (or is blocking) the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    ConsecutiveLosses,
    HourlyLoss,
    DailyLoss,
    TradesPerMinute,
    DailyTrades,
}

impl TripReason {
    /// Stable key reported to callers
    pub fn as_str(&self) -> &'static str {
        match self {
            TripReason::ConsecutiveLosses => "consecutive_losses",
            TripReason::HourlyLoss => "hourly_loss",
            TripReason::DailyLoss => "daily_loss",
            TripReason::TradesPerMinute => "trades_per_minute",
            TripReason::DailyTrades => "daily_trades",
        }
    }
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to "can trade now?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeGate {
    Allowed,
    Blocked { reason: TripReason, detail: String },
}

impl TradeGate {
    pub fn is_allowed(&self) -> bool {
        matches!(self, TradeGate::Allowed)
    }

    /// Reason key, `None` when allowed
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            TradeGate::Allowed => None,
            TradeGate::Blocked { reason, .. } => Some(reason.as_str()),
        }
    }

    /// `(allowed, reason)`; the reason is empty when allowed
    pub fn as_tuple(&self) -> (bool, String) {
        (
            self.is_allowed(),
            self.reason().map(str::to_string).unwrap_or_default(),
        )
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            TradeGate::Allowed => Ok(()),
            TradeGate::Blocked { reason, detail } => {
                Err(EngineError::RiskBlocked(format!("{}: {}", reason, detail)))
            }
        }
    }
}

/// Aggregates over the rolling windows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowTotals {
    /// Sum of loss magnitudes (ROI %) in the last hour
    pub hourly_loss: Decimal,
    /// Sum of loss magnitudes (ROI %) in the last 24 hours
    pub daily_loss: Decimal,
    pub trades_last_minute: u32,
    pub daily_trades: u32,
}

/// Read-only view for status reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub enabled: bool,
    pub state: CircuitState,
    pub consecutive_losses: u32,
    pub windows: WindowTotals,
    pub trip_reason: Option<TripReason>,
    pub tripped_at: Option<Timestamp>,
    pub cooldown_until: Option<Timestamp>,
    pub trip_count: u64,
}

impl BreakerSnapshot {
    /// `disabled`, `tripped` or `active`
    pub fn label(&self) -> &'static str {
        if !self.enabled {
            "disabled"
        } else if self.state == CircuitState::Open {
            "tripped"
        } else {
            "active"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_tuple() {
        assert_eq!(TradeGate::Allowed.as_tuple(), (true, String::new()));
        let blocked = TradeGate::Blocked {
            reason: TripReason::ConsecutiveLosses,
            detail: "3 in a row".to_string(),
        };
        assert_eq!(blocked.as_tuple(), (false, "consecutive_losses".to_string()));
    }

    #[test]
    fn test_blocked_gate_is_risk_error() {
        let blocked = TradeGate::Blocked {
            reason: TripReason::DailyLoss,
            detail: "5.2% >= 5%".to_string(),
        };
        assert!(matches!(
            blocked.into_result(),
            Err(EngineError::RiskBlocked(_))
        ));
    }
}
