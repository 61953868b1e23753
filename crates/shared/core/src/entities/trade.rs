use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DecisionContext, Direction, PositionSide, SourceTag, TradingMode};
use crate::values::{Price, Quantity, Symbol, Timestamp};

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    RoiTarget,
    CloseAll,
    Manual,
    Emergency,
}

/// WIN / LOSS / BREAKEVEN classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

/// Record of a closed position. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub id: Uuid,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub mode: TradingMode,
    pub source: SourceTag,
    pub entry_price: Price,
    pub exit_price: Price,
    pub quantity: Quantity,
    /// Realized PnL in quote currency
    pub realized_pnl: Decimal,
    /// Leveraged return on margin (percent)
    pub pnl_percent: Decimal,
    pub duration_secs: i64,
    pub close_reason: CloseReason,
    pub opened_at: Timestamp,
    pub closed_at: Timestamp,
    pub decision: Option<DecisionContext>,
}

impl TradeResult {
    pub fn outcome(&self) -> TradeOutcome {
        if self.realized_pnl > Decimal::ZERO {
            TradeOutcome::Win
        } else if self.realized_pnl < Decimal::ZERO {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        }
    }

    pub fn is_loss(&self) -> bool {
        self.outcome() == TradeOutcome::Loss
    }

    pub fn direction(&self) -> Direction {
        self.side.into()
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs)
    }
}
