mod decision;
mod mode;
mod position;
mod protection;
mod scan;
mod side;
mod signal;
mod trade;

pub use decision::{DecisionContext, Direction, RiskLevel, Verdict};
pub use mode::TradingMode;
pub use position::{Position, SourceTag, TakeProfitLevel, TakeProfitStatus, TrailingStop};
pub use protection::ProtectionState;
pub use scan::{TechnicalScan, TimeframeTrend};
pub use side::{PositionSide, Side};
pub use signal::{SignalLogEntry, SignalStatus};
pub use trade::{CloseReason, TradeOutcome, TradeResult};
