use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{DecisionContext, PositionSide, ProtectionState, TradingMode};
use crate::values::{Price, Quantity, Symbol, Timestamp};

/// Who opened the position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Ai,
    Strategy,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakeProfitStatus {
    Pending,
    Hit,
}

/// One stage of a staged take-profit ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// 1-based stage number
    pub level: u8,
    /// Share of the position closed at this stage (percent)
    pub close_percent: Decimal,
    /// Distance from entry (percent of price)
    pub gain_percent: Decimal,
    pub price: Price,
    pub status: TakeProfitStatus,
}

/// Trailing stop configuration attached to a position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub enabled: bool,
    /// Trail distance (percent of price)
    pub percent: Decimal,
    /// Profit (percent of price) at which trailing starts
    pub activation_percent: Decimal,
}

/// An autopilot-managed futures position.
///
/// Owned by exactly one tenant's ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub mode: TradingMode,
    pub entry_price: Price,
    /// Always positive
    pub quantity: Quantity,
    pub leverage: u32,
    pub stop_loss: Option<Price>,
    pub take_profits: Vec<TakeProfitLevel>,
    pub trailing: TrailingStop,
    /// Per-position ROI target override (percent)
    pub custom_roi_percent: Option<Decimal>,
    pub protection: ProtectionState,
    /// Exchange order ids of the live SL/TP orders
    pub protective_order_ids: Vec<String>,
    pub source: SourceTag,
    pub decision: Option<DecisionContext>,
    pub opened_at: Timestamp,
    pub closed_at: Option<Timestamp>,
    /// When SL/TP levels were last computed
    pub levels_updated_at: Option<Timestamp>,
}

impl Position {
    /// New position, unprotected until the supervisor confirms SL/TP placement
    pub fn new(
        symbol: impl Into<Symbol>,
        side: PositionSide,
        mode: TradingMode,
        entry_price: Price,
        quantity: Quantity,
        leverage: u32,
        opened_at: Timestamp,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            mode,
            entry_price,
            quantity,
            leverage: leverage.max(1),
            stop_loss: None,
            take_profits: Vec::new(),
            trailing: TrailingStop::default(),
            custom_roi_percent: None,
            protection: ProtectionState::Unprotected,
            protective_order_ids: Vec::new(),
            source: SourceTag::Ai,
            decision: None,
            opened_at,
            closed_at: None,
            levels_updated_at: None,
        }
    }

    /// Notional value at entry
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// Margin committed at entry
    pub fn margin(&self) -> Decimal {
        self.notional() / Decimal::from(self.leverage)
    }

    /// Unrealized PnL (quote currency) at a mark price
    pub fn unrealized_pnl(&self, mark: Price) -> Decimal {
        (mark - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Price move from entry in the position's favour (percent)
    pub fn price_move_percent(&self, mark: Price) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (mark - self.entry_price) / self.entry_price * dec!(100) * self.side.sign()
    }

    /// Leveraged return on margin (percent)
    pub fn roi_percent(&self, mark: Price) -> Decimal {
        self.price_move_percent(mark) * Decimal::from(self.leverage)
    }

    /// Set SL and a four-stage TP ladder from percentage distances off entry.
    ///
    /// Stages sit at 25/50/75/100% of the TP distance, each closing 25%.
    pub fn apply_levels(&mut self, sl_percent: Decimal, tp_percent: Decimal, at: Timestamp) {
        let sign = self.side.sign();
        self.stop_loss = Some(self.entry_price * (Decimal::ONE - sign * sl_percent / dec!(100)));
        self.take_profits = (1..=4u8)
            .map(|level| {
                let gain = tp_percent * Decimal::from(level) / dec!(4);
                TakeProfitLevel {
                    level,
                    close_percent: dec!(25),
                    gain_percent: gain,
                    price: self.entry_price * (Decimal::ONE + sign * gain / dec!(100)),
                    status: TakeProfitStatus::Pending,
                }
            })
            .collect();
        self.levels_updated_at = Some(at);
    }

    /// Whether the mark price is at or beyond the stop
    pub fn stop_breached(&self, mark: Price) -> bool {
        match (self.stop_loss, self.side) {
            (Some(sl), PositionSide::Long) => mark <= sl,
            (Some(sl), PositionSide::Short) => mark >= sl,
            (None, _) => false,
        }
    }
}
