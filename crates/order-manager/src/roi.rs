//! ROI target resolution
//!
//! Priority: position override > saved per-symbol target > mode default.

use crate::error::{Error, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{ModeConfig, Position, Price, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiSource {
    Position,
    Symbol,
    Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiTarget {
    pub percent: Decimal,
    pub source: RoiSource,
}

/// Effective ROI target for a position
pub fn resolve_roi_target(
    position: &Position,
    symbol_roi: &BTreeMap<Symbol, Decimal>,
    mode: &ModeConfig,
) -> RoiTarget {
    if let Some(percent) = position.custom_roi_percent {
        return RoiTarget {
            percent,
            source: RoiSource::Position,
        };
    }
    if let Some(percent) = symbol_roi.get(&position.symbol) {
        return RoiTarget {
            percent: *percent,
            source: RoiSource::Symbol,
        };
    }
    RoiTarget {
        percent: mode.roi_target_percent,
        source: RoiSource::Mode,
    }
}

/// Accepts ROI targets in (0, 1000]
pub fn validate_roi_percent(percent: Decimal) -> Result<Decimal> {
    if percent <= Decimal::ZERO || percent > dec!(1000) {
        return Err(Error::Invalid(format!(
            "ROI target must be within 0-1000%, got {}",
            percent
        )));
    }
    Ok(percent)
}

/// Whether the position's ROI at `mark` has reached the target
pub fn target_reached(position: &Position, mark: Price, target: &RoiTarget) -> bool {
    position.roi_percent(mark) >= target.percent
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::{PositionSide, TradingMode};

    fn position() -> Position {
        Position::new(
            "ETHUSDT",
            PositionSide::Long,
            TradingMode::Scalp,
            dec!(2000),
            dec!(1),
            8,
            Utc::now(),
        )
    }

    #[test]
    fn test_resolution_priority() {
        let mode = ModeConfig::defaults_for(TradingMode::Scalp);
        let mut symbols = BTreeMap::new();
        let mut pos = position();

        let target = resolve_roi_target(&pos, &symbols, &mode);
        assert_eq!(target.source, RoiSource::Mode);
        assert_eq!(target.percent, dec!(15));

        symbols.insert("ETHUSDT".to_string(), dec!(12));
        assert_eq!(
            resolve_roi_target(&pos, &symbols, &mode).source,
            RoiSource::Symbol
        );

        pos.custom_roi_percent = Some(dec!(5));
        let target = resolve_roi_target(&pos, &symbols, &mode);
        assert_eq!(target.source, RoiSource::Position);
        assert_eq!(target.percent, dec!(5));
    }

    #[test]
    fn test_validate_bounds() {
        assert!(validate_roi_percent(dec!(0)).is_err());
        assert!(validate_roi_percent(dec!(1000.1)).is_err());
        assert_eq!(validate_roi_percent(dec!(1000)).unwrap(), dec!(1000));
    }

    #[test]
    fn test_target_reached_uses_leverage() {
        let pos = position();
        let target = RoiTarget {
            percent: dec!(15),
            source: RoiSource::Mode,
        };
        // +2% move at 8x = 16% ROI
        assert!(target_reached(&pos, dec!(2040), &target));
        // +1.5% at 8x = 12%
        assert!(!target_reached(&pos, dec!(2030), &target));
    }
}
