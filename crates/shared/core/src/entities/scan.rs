use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{Direction, TradingMode};
use crate::values::{Price, Symbol, Timestamp};

/// Trend observed on one analysis timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeTrend {
    /// Timeframe label (`5m`, `1h`, `4h`, `1d`)
    pub timeframe: String,
    pub direction: Direction,
    /// Trend strength 0-100
    pub strength: f64,
}

/// Multi-timeframe technical scan of a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalScan {
    pub symbol: Symbol,
    pub mode: TradingMode,
    /// Last traded / mark price
    pub price: Price,
    /// Direction suggested by the technical indicators
    pub direction: Direction,
    /// Technical confidence 0-100
    pub confidence: f64,
    /// Average true range as a percent of price
    pub atr_percent: Decimal,
    pub trends: Vec<TimeframeTrend>,
    pub scanned_at: Timestamp,
}

impl TechnicalScan {
    /// Trend on a given timeframe, if the scan covered it
    pub fn trend(&self, timeframe: &str) -> Option<&TimeframeTrend> {
        self.trends.iter().find(|t| t.timeframe == timeframe)
    }

    /// Stable fingerprint of the scan's decision-relevant content.
    ///
    /// Two scans with the same direction, confidence bucket and trend set
    /// produce the same fingerprint so a cached LLM opinion can be reused.
    /// Price and timestamp are deliberately excluded.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.symbol.hash(&mut hasher);
        self.mode.hash(&mut hasher);
        self.direction.hash(&mut hasher);
        // 5-point confidence buckets
        ((self.confidence / 5.0).floor() as i64).hash(&mut hasher);
        for trend in &self.trends {
            trend.timeframe.hash(&mut hasher);
            trend.direction.hash(&mut hasher);
        }
        hasher.finish()
    }
}
