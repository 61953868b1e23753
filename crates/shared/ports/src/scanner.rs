use async_trait::async_trait;
use sentinel_core::{Symbol, TechnicalScan, TradingMode};

use crate::error::ScanResult;

/// Port for market data analysis.
///
/// Market data is global; one scanner serves every tenant.
#[async_trait]
pub trait MarketScanner: Send + Sync {
    /// Symbols worth scanning for a mode right now
    async fn candidates(&self, mode: TradingMode) -> ScanResult<Vec<Symbol>>;

    /// Multi-timeframe technical scan of a symbol for a mode
    async fn scan(&self, symbol: &str, mode: TradingMode) -> ScanResult<TechnicalScan>;
}
