//! Volatility-aware SL/TP sizing
//!
//! Base distances are ATR multiples, optionally blended with LLM-suggested
//! levels, then clamped to per-mode bounds:
//!
//! ```text
//! sl% = clamp(atr% × k_sl ⊕ llm_sl%, min_sl, max_sl)
//! tp% = clamp(atr% × k_tp ⊕ llm_tp%, min_tp, max_tp)
//!
//! a ⊕ b = a × (1 − w) + b × w      (w = llm_weight, only when b > 0)
//! ```

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{PositionSide, Price, RiskLevel, TradingMode};
use sentinel_ports::LlmOpinion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ATR multipliers and clamps for one mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSlTpProfile {
    pub atr_multiplier_sl: Decimal,
    pub atr_multiplier_tp: Decimal,
    pub min_sl_percent: Decimal,
    pub max_sl_percent: Decimal,
    pub min_tp_percent: Decimal,
    pub max_tp_percent: Decimal,
}

impl ModeSlTpProfile {
    pub fn defaults_for(mode: TradingMode) -> Self {
        let (k_sl, k_tp, min_sl, max_sl, min_tp, max_tp) = match mode {
            TradingMode::Scalp => (dec!(0.5), dec!(1.0), dec!(0.2), dec!(0.8), dec!(0.3), dec!(2)),
            TradingMode::Swing => (dec!(1.5), dec!(3), dec!(1), dec!(5), dec!(2), dec!(15)),
            TradingMode::Position => (dec!(2.5), dec!(5), dec!(3), dec!(15), dec!(5), dec!(50)),
            TradingMode::UltraFast => (dec!(1.5), dec!(2), dec!(0.3), dec!(3), dec!(0.5), dec!(5)),
        };
        Self {
            atr_multiplier_sl: k_sl,
            atr_multiplier_tp: k_tp,
            min_sl_percent: min_sl,
            max_sl_percent: max_sl,
            min_tp_percent: min_tp,
            max_tp_percent: max_tp,
        }
    }
}

/// Calculator configuration
#[derive(Debug, Clone)]
pub struct DynamicSlTpConfig {
    /// Share of an LLM-suggested distance in the blend
    pub llm_weight: Decimal,
    /// Levels computed longer ago than this are out of date
    pub stale_after: Duration,
    pub profiles: BTreeMap<TradingMode, ModeSlTpProfile>,
}

impl Default for DynamicSlTpConfig {
    fn default() -> Self {
        Self {
            llm_weight: dec!(0.3),
            stale_after: Duration::minutes(15),
            profiles: TradingMode::ALL
                .iter()
                .map(|mode| (*mode, ModeSlTpProfile::defaults_for(*mode)))
                .collect(),
        }
    }
}

impl DynamicSlTpConfig {
    pub fn profile(&self, mode: TradingMode) -> ModeSlTpProfile {
        self.profiles
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| ModeSlTpProfile::defaults_for(mode))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl VolatilityLevel {
    pub fn from_atr_percent(atr_percent: Decimal) -> Self {
        if atr_percent < dec!(0.5) {
            VolatilityLevel::VeryLow
        } else if atr_percent < dec!(1) {
            VolatilityLevel::Low
        } else if atr_percent < dec!(2) {
            VolatilityLevel::Moderate
        } else if atr_percent < dec!(3) {
            VolatilityLevel::High
        } else {
            VolatilityLevel::VeryHigh
        }
    }
}

/// LLM-suggested levels, absolute prices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmLevels {
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub risk_level: Option<RiskLevel>,
}

impl From<&LlmOpinion> for LlmLevels {
    fn from(opinion: &LlmOpinion) -> Self {
        Self {
            stop_loss: opinion.stop_loss,
            take_profit: opinion.take_profit,
            risk_level: opinion.risk_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlTpLevels {
    pub sl_percent: Decimal,
    pub tp_percent: Decimal,
    pub stop_loss_price: Price,
    pub take_profit_price: Price,
    /// ATR percent actually used (after the zero fallback)
    pub atr_percent: Decimal,
    pub volatility: VolatilityLevel,
    pub used_llm: bool,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default)]
pub struct SlTpCalculator {
    config: DynamicSlTpConfig,
}

impl SlTpCalculator {
    pub fn new(config: DynamicSlTpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DynamicSlTpConfig {
        &self.config
    }

    pub fn calculate(
        &self,
        mode: TradingMode,
        side: PositionSide,
        price: Price,
        atr_percent: Decimal,
        llm: Option<&LlmLevels>,
    ) -> SlTpLevels {
        let profile = self.config.profile(mode);
        let atr = if atr_percent <= Decimal::ZERO {
            Decimal::ONE
        } else {
            atr_percent
        };

        let mut sl = atr * profile.atr_multiplier_sl;
        let mut tp = atr * profile.atr_multiplier_tp;
        let mut reasoning = format!(
            "ATR {}%: base SL {}%, TP {}%",
            atr,
            sl.round_dp(3),
            tp.round_dp(3)
        );
        let mut used_llm = false;

        let weight = self.config.llm_weight;
        if let Some(levels) = llm.filter(|_| weight > Decimal::ZERO && price > Decimal::ZERO) {
            let sign = side.sign();
            let llm_sl = levels
                .stop_loss
                .filter(|p| *p > Decimal::ZERO)
                .map(|p| (price - p) / price * dec!(100) * sign)
                .unwrap_or(Decimal::ZERO);
            let llm_tp = levels
                .take_profit
                .filter(|p| *p > Decimal::ZERO)
                .map(|p| (p - price) / price * dec!(100) * sign)
                .unwrap_or(Decimal::ZERO);

            if llm_sl > Decimal::ZERO {
                sl = sl * (Decimal::ONE - weight) + llm_sl * weight;
                used_llm = true;
                reasoning.push_str("; LLM SL blended");
            }
            if llm_tp > Decimal::ZERO {
                tp = tp * (Decimal::ONE - weight) + llm_tp * weight;
                used_llm = true;
                reasoning.push_str("; LLM TP blended");
            }
            match levels.risk_level {
                Some(RiskLevel::High) => {
                    sl *= dec!(0.8);
                    reasoning.push_str("; high risk, tighter SL");
                }
                Some(RiskLevel::Low) => {
                    sl *= dec!(1.2);
                    tp *= dec!(1.2);
                    reasoning.push_str("; low risk, wider SL/TP");
                }
                _ => {}
            }
        }

        let sl = sl.clamp(profile.min_sl_percent, profile.max_sl_percent);
        let tp = tp.clamp(profile.min_tp_percent, profile.max_tp_percent);
        reasoning.push_str(&format!("; final SL {}%, TP {}%", sl.round_dp(3), tp.round_dp(3)));

        let sign = side.sign();
        SlTpLevels {
            sl_percent: sl,
            tp_percent: tp,
            stop_loss_price: price * (Decimal::ONE - sign * sl / dec!(100)),
            take_profit_price: price * (Decimal::ONE + sign * tp / dec!(100)),
            atr_percent: atr,
            volatility: VolatilityLevel::from_atr_percent(atr),
            used_llm,
            reasoning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swing_atr_levels() {
        let calc = SlTpCalculator::default();
        let levels = calc.calculate(
            TradingMode::Swing,
            PositionSide::Long,
            dec!(100),
            dec!(1.2),
            None,
        );
        assert_eq!(levels.sl_percent, dec!(1.8));
        assert_eq!(levels.tp_percent, dec!(3.6));
        assert_eq!(levels.stop_loss_price, dec!(98.2));
        assert_eq!(levels.take_profit_price, dec!(103.6));
        assert_eq!(levels.volatility, VolatilityLevel::Moderate);
        assert!(!levels.used_llm);
    }

    #[test]
    fn test_zero_atr_falls_back_to_one_percent() {
        let calc = SlTpCalculator::default();
        let levels = calc.calculate(
            TradingMode::UltraFast,
            PositionSide::Long,
            dec!(100),
            Decimal::ZERO,
            None,
        );
        assert_eq!(levels.atr_percent, dec!(1));
        assert_eq!(levels.sl_percent, dec!(1.5));
        assert_eq!(levels.tp_percent, dec!(2));
    }

    #[test]
    fn test_scalp_clamps() {
        let calc = SlTpCalculator::default();
        let levels = calc.calculate(
            TradingMode::Scalp,
            PositionSide::Short,
            dec!(100),
            dec!(4),
            None,
        );
        // 4 × 0.5 = 2 → capped at 0.8; 4 × 1 = 4 → capped at 2
        assert_eq!(levels.sl_percent, dec!(0.8));
        assert_eq!(levels.tp_percent, dec!(2));
        assert_eq!(levels.stop_loss_price, dec!(100.8));
        assert_eq!(levels.take_profit_price, dec!(98));
        assert_eq!(levels.volatility, VolatilityLevel::VeryHigh);
    }

    #[test]
    fn test_llm_blend_and_high_risk() {
        let calc = SlTpCalculator::default();
        let llm = LlmLevels {
            stop_loss: Some(dec!(97)),
            take_profit: None,
            risk_level: Some(RiskLevel::High),
        };
        let levels = calc.calculate(
            TradingMode::Swing,
            PositionSide::Long,
            dec!(100),
            dec!(1),
            Some(&llm),
        );
        // (1.5 × 0.7 + 3 × 0.3) × 0.8 = 1.56
        assert_eq!(levels.sl_percent, dec!(1.56));
        assert_eq!(levels.tp_percent, dec!(3));
        assert!(levels.used_llm);
    }

    #[test]
    fn test_low_risk_widens_both() {
        let calc = SlTpCalculator::default();
        let llm = LlmLevels {
            risk_level: Some(RiskLevel::Low),
            ..Default::default()
        };
        let levels = calc.calculate(
            TradingMode::Position,
            PositionSide::Long,
            dec!(100),
            dec!(2),
            Some(&llm),
        );
        assert_eq!(levels.sl_percent, dec!(6.0));
        assert_eq!(levels.tp_percent, dec!(12.0));
    }

    #[test]
    fn test_llm_level_on_wrong_side_is_ignored() {
        let calc = SlTpCalculator::default();
        // Stop above entry for a long is nonsense
        let llm = LlmLevels {
            stop_loss: Some(dec!(105)),
            ..Default::default()
        };
        let levels = calc.calculate(
            TradingMode::Swing,
            PositionSide::Long,
            dec!(100),
            dec!(1),
            Some(&llm),
        );
        assert_eq!(levels.sl_percent, dec!(1.5));
        assert!(!levels.used_llm);
    }

    #[test]
    fn test_volatility_buckets() {
        assert_eq!(VolatilityLevel::from_atr_percent(dec!(0.4)), VolatilityLevel::VeryLow);
        assert_eq!(VolatilityLevel::from_atr_percent(dec!(0.5)), VolatilityLevel::Low);
        assert_eq!(VolatilityLevel::from_atr_percent(dec!(2.5)), VolatilityLevel::High);
        assert_eq!(VolatilityLevel::from_atr_percent(dec!(3)), VolatilityLevel::VeryHigh);
    }
}
