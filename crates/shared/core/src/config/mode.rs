use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::error::{ConfigError, Result};
use crate::entities::TradingMode;

/// Trailing stop settings applied to new positions of a mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingSettings {
    pub enabled: bool,
    pub percent: Decimal,
    pub activation_percent: Decimal,
}

/// LLM participation in a mode's decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeLlmSettings {
    pub enabled: bool,
    /// Share of the fused confidence taken from the LLM (0.0-1.0)
    pub weight: f64,
    /// Opinions below this confidence are ignored
    pub min_confidence: f64,
    pub timeout_ms: u64,
    /// On timeout, continue technical-only instead of skipping the signal
    pub skip_on_timeout: bool,
    pub block_on_disagreement: bool,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
}

/// Higher-timeframe trend filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceSettings {
    pub block_on_divergence: bool,
    pub higher_timeframe: String,
}

/// Per-mode trading configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    /// Max concurrent positions opened by this mode
    pub max_positions: usize,
    pub max_usd_per_position: Decimal,
    pub leverage: u32,
    /// Minimum fused confidence (0-100) to execute
    pub min_confidence: f64,
    pub sl_percent: Decimal,
    pub tp_percent: Decimal,
    pub trailing: TrailingSettings,
    /// ROI (percent of margin) at which profit is booked early
    pub roi_target_percent: Decimal,
    pub daily_trade_cap: u32,
    /// Realized loss (USD) per day after which the mode stops opening
    pub daily_loss_cap: Decimal,
    pub llm: ModeLlmSettings,
    pub divergence: DivergenceSettings,
}

impl ModeConfig {
    /// Built-in defaults for a mode
    pub fn defaults_for(mode: TradingMode) -> Self {
        match mode {
            TradingMode::UltraFast => Self {
                enabled: true,
                scan_interval_secs: 5,
                max_positions: 5,
                max_usd_per_position: dec!(200),
                leverage: 10,
                min_confidence: 50.0,
                sl_percent: dec!(1.0),
                tp_percent: dec!(2.0),
                trailing: TrailingSettings {
                    enabled: false,
                    percent: dec!(0.3),
                    activation_percent: dec!(0.5),
                },
                roi_target_percent: dec!(10),
                daily_trade_cap: 100,
                daily_loss_cap: dec!(50),
                llm: ModeLlmSettings {
                    enabled: true,
                    weight: 0.10,
                    min_confidence: 40.0,
                    timeout_ms: 2_000,
                    skip_on_timeout: true,
                    block_on_disagreement: false,
                    cache_enabled: true,
                    cache_ttl_secs: 300,
                },
                divergence: DivergenceSettings {
                    block_on_divergence: false,
                    higher_timeframe: "15m".to_string(),
                },
            },
            TradingMode::Scalp => Self {
                enabled: true,
                scan_interval_secs: 60,
                max_positions: 4,
                max_usd_per_position: dec!(400),
                leverage: 8,
                min_confidence: 60.0,
                sl_percent: dec!(1.5),
                tp_percent: dec!(3.0),
                trailing: TrailingSettings {
                    enabled: true,
                    percent: dec!(0.5),
                    activation_percent: dec!(0.5),
                },
                roi_target_percent: dec!(15),
                daily_trade_cap: 50,
                daily_loss_cap: dec!(75),
                llm: ModeLlmSettings {
                    enabled: true,
                    weight: 0.20,
                    min_confidence: 50.0,
                    timeout_ms: 3_000,
                    skip_on_timeout: true,
                    block_on_disagreement: false,
                    cache_enabled: true,
                    cache_ttl_secs: 300,
                },
                divergence: DivergenceSettings {
                    block_on_divergence: false,
                    higher_timeframe: "1h".to_string(),
                },
            },
            TradingMode::Swing => Self {
                enabled: true,
                scan_interval_secs: 120,
                max_positions: 3,
                max_usd_per_position: dec!(750),
                leverage: 5,
                min_confidence: 65.0,
                sl_percent: dec!(2.5),
                tp_percent: dec!(5.0),
                trailing: TrailingSettings {
                    enabled: true,
                    percent: dec!(1.5),
                    activation_percent: dec!(1.0),
                },
                roi_target_percent: dec!(20),
                daily_trade_cap: 20,
                daily_loss_cap: dec!(100),
                llm: ModeLlmSettings {
                    enabled: true,
                    weight: 0.40,
                    min_confidence: 60.0,
                    timeout_ms: 5_000,
                    skip_on_timeout: false,
                    block_on_disagreement: true,
                    cache_enabled: false,
                    cache_ttl_secs: 300,
                },
                divergence: DivergenceSettings {
                    block_on_divergence: true,
                    higher_timeframe: "4h".to_string(),
                },
            },
            TradingMode::Position => Self {
                enabled: true,
                scan_interval_secs: 300,
                max_positions: 2,
                max_usd_per_position: dec!(1000),
                leverage: 3,
                min_confidence: 75.0,
                sl_percent: dec!(3.5),
                tp_percent: dec!(8.0),
                trailing: TrailingSettings {
                    enabled: true,
                    percent: dec!(2.5),
                    activation_percent: dec!(2.0),
                },
                roi_target_percent: dec!(30),
                daily_trade_cap: 10,
                daily_loss_cap: dec!(150),
                llm: ModeLlmSettings {
                    enabled: true,
                    weight: 0.50,
                    min_confidence: 65.0,
                    timeout_ms: 5_000,
                    skip_on_timeout: false,
                    block_on_disagreement: true,
                    cache_enabled: false,
                    cache_ttl_secs: 300,
                },
                divergence: DivergenceSettings {
                    block_on_divergence: true,
                    higher_timeframe: "1d".to_string(),
                },
            },
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm.timeout_ms)
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(not_positive("scan_interval_secs", self.scan_interval_secs));
        }
        if self.max_positions == 0 {
            return Err(not_positive("max_positions", self.max_positions));
        }
        if self.max_usd_per_position <= Decimal::ZERO {
            return Err(not_positive("max_usd_per_position", self.max_usd_per_position));
        }
        if !(1..=125).contains(&self.leverage) {
            return Err(out_of_range("leverage", self.leverage, "1-125"));
        }
        check_percent_range("min_confidence", self.min_confidence)?;
        if self.sl_percent <= Decimal::ZERO {
            return Err(not_positive("sl_percent", self.sl_percent));
        }
        if self.tp_percent <= Decimal::ZERO {
            return Err(not_positive("tp_percent", self.tp_percent));
        }
        if self.trailing.percent < Decimal::ZERO {
            return Err(out_of_range("trailing_percent", self.trailing.percent, ">= 0"));
        }
        if self.trailing.activation_percent < Decimal::ZERO {
            return Err(out_of_range(
                "trailing_activation_percent",
                self.trailing.activation_percent,
                ">= 0",
            ));
        }
        if self.roi_target_percent <= Decimal::ZERO || self.roi_target_percent > dec!(1000) {
            return Err(out_of_range(
                "roi_target_percent",
                self.roi_target_percent,
                "0-1000",
            ));
        }
        if self.daily_loss_cap <= Decimal::ZERO {
            return Err(not_positive("daily_loss_cap", self.daily_loss_cap));
        }
        if !(0.0..=1.0).contains(&self.llm.weight) {
            return Err(out_of_range("llm_weight", self.llm.weight, "0.0-1.0"));
        }
        check_percent_range("llm_min_confidence", self.llm.min_confidence)?;
        if self.llm.timeout_ms == 0 {
            return Err(not_positive("llm_timeout_ms", self.llm.timeout_ms));
        }
        Ok(())
    }

    /// Apply a patch to a copy of this config and validate the result
    pub fn merge(&self, patch: &ModeConfigPatch) -> Result<Self> {
        let mut merged = self.clone();

        set(&mut merged.enabled, patch.enabled);
        set(&mut merged.scan_interval_secs, patch.scan_interval_secs);
        set(&mut merged.max_positions, patch.max_positions);
        set(&mut merged.max_usd_per_position, patch.max_usd_per_position);
        set(&mut merged.leverage, patch.leverage);
        set(&mut merged.min_confidence, patch.min_confidence);
        set(&mut merged.sl_percent, patch.sl_percent);
        set(&mut merged.tp_percent, patch.tp_percent);
        set(&mut merged.trailing.enabled, patch.trailing_enabled);
        set(&mut merged.trailing.percent, patch.trailing_percent);
        set(
            &mut merged.trailing.activation_percent,
            patch.trailing_activation_percent,
        );
        set(&mut merged.roi_target_percent, patch.roi_target_percent);
        set(&mut merged.daily_trade_cap, patch.daily_trade_cap);
        set(&mut merged.daily_loss_cap, patch.daily_loss_cap);
        set(&mut merged.llm.enabled, patch.llm_enabled);
        set(&mut merged.llm.weight, patch.llm_weight);
        set(&mut merged.llm.min_confidence, patch.llm_min_confidence);
        set(&mut merged.llm.timeout_ms, patch.llm_timeout_ms);
        set(&mut merged.llm.skip_on_timeout, patch.llm_skip_on_timeout);
        set(
            &mut merged.llm.block_on_disagreement,
            patch.llm_block_on_disagreement,
        );
        set(&mut merged.llm.cache_enabled, patch.llm_cache_enabled);
        set(&mut merged.llm.cache_ttl_secs, patch.llm_cache_ttl_secs);
        set(
            &mut merged.divergence.block_on_divergence,
            patch.block_on_divergence,
        );
        if let Some(tf) = &patch.divergence_timeframe {
            merged.divergence.higher_timeframe = tf.clone();
        }

        merged.validate()?;
        Ok(merged)
    }

    /// Current value of a tunable parameter
    pub fn parameter(&self, param: ModeParameter) -> f64 {
        match param {
            ModeParameter::MinConfidence => self.min_confidence,
            ModeParameter::LlmWeight => self.llm.weight,
            ModeParameter::BlockOnDisagreement => {
                if self.llm.block_on_disagreement {
                    1.0
                } else {
                    0.0
                }
            }
            ModeParameter::SlPercent => self.sl_percent.to_f64().unwrap_or_default(),
        }
    }

    /// Patch that sets a single tunable parameter
    pub fn parameter_patch(param: ModeParameter, value: f64) -> Result<ModeConfigPatch> {
        let mut patch = ModeConfigPatch::default();
        match param {
            ModeParameter::MinConfidence => patch.min_confidence = Some(value),
            ModeParameter::LlmWeight => patch.llm_weight = Some(value),
            ModeParameter::BlockOnDisagreement => {
                patch.llm_block_on_disagreement = Some(value >= 0.5)
            }
            ModeParameter::SlPercent => {
                let pct = Decimal::try_from(value).map_err(|_| ConfigError::OutOfRange {
                    field: "sl_percent",
                    value: value.to_string(),
                    expected: "finite number",
                })?;
                patch.sl_percent = Some(pct);
            }
        }
        Ok(patch)
    }
}

/// Parameters the adaptive learner may tune
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeParameter {
    MinConfidence,
    LlmWeight,
    BlockOnDisagreement,
    SlPercent,
}

impl ModeParameter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeParameter::MinConfidence => "min_confidence",
            ModeParameter::LlmWeight => "llm_weight",
            ModeParameter::BlockOnDisagreement => "block_on_disagreement",
            ModeParameter::SlPercent => "sl_percent",
        }
    }
}

impl fmt::Display for ModeParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial update of [`ModeConfig`]; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfigPatch {
    pub enabled: Option<bool>,
    pub scan_interval_secs: Option<u64>,
    pub max_positions: Option<usize>,
    pub max_usd_per_position: Option<Decimal>,
    pub leverage: Option<u32>,
    pub min_confidence: Option<f64>,
    pub sl_percent: Option<Decimal>,
    pub tp_percent: Option<Decimal>,
    pub trailing_enabled: Option<bool>,
    pub trailing_percent: Option<Decimal>,
    pub trailing_activation_percent: Option<Decimal>,
    pub roi_target_percent: Option<Decimal>,
    pub daily_trade_cap: Option<u32>,
    pub daily_loss_cap: Option<Decimal>,
    pub llm_enabled: Option<bool>,
    pub llm_weight: Option<f64>,
    pub llm_min_confidence: Option<f64>,
    pub llm_timeout_ms: Option<u64>,
    pub llm_skip_on_timeout: Option<bool>,
    pub llm_block_on_disagreement: Option<bool>,
    pub llm_cache_enabled: Option<bool>,
    pub llm_cache_ttl_secs: Option<u64>,
    pub block_on_divergence: Option<bool>,
    pub divergence_timeframe: Option<String>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

fn not_positive(field: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::NotPositive {
        field,
        value: value.to_string(),
    }
}

fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
        expected,
    }
}

fn check_percent_range(field: &'static str, value: f64) -> Result<()> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(out_of_range(field, value, "0-100"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_defaults_validate() {
        for mode in TradingMode::ALL {
            ModeConfig::defaults_for(mode).validate().unwrap();
        }
    }

    #[test]
    fn test_defaults_tighten_with_horizon() {
        let ultra = ModeConfig::defaults_for(TradingMode::UltraFast);
        let position = ModeConfig::defaults_for(TradingMode::Position);
        assert!(ultra.min_confidence < position.min_confidence);
        assert!(ultra.scan_interval() < position.scan_interval());
        assert!(!ultra.llm.block_on_disagreement);
        assert!(position.llm.block_on_disagreement);
    }

    #[test]
    fn test_merge_applies_nested_fields() {
        let config = ModeConfig::defaults_for(TradingMode::Scalp);
        let patch = ModeConfigPatch {
            min_confidence: Some(70.0),
            llm_weight: Some(0.3),
            trailing_enabled: Some(false),
            ..Default::default()
        };

        let merged = config.merge(&patch).unwrap();
        assert_eq!(merged.min_confidence, 70.0);
        assert_eq!(merged.llm.weight, 0.3);
        assert!(!merged.trailing.enabled);
        assert_eq!(merged.max_positions, config.max_positions);
    }

    #[test]
    fn test_merge_rejects_out_of_range_weight() {
        let config = ModeConfig::defaults_for(TradingMode::Scalp);
        let patch = ModeConfigPatch {
            llm_weight: Some(1.5),
            ..Default::default()
        };

        assert!(matches!(
            config.merge(&patch),
            Err(ConfigError::OutOfRange {
                field: "llm_weight",
                ..
            })
        ));
    }

    #[test]
    fn test_parameter_patch_round_trip() {
        let config = ModeConfig::defaults_for(TradingMode::Swing);
        let patch = ModeConfig::parameter_patch(ModeParameter::LlmWeight, 0.35).unwrap();
        let merged = config.merge(&patch).unwrap();
        assert_eq!(merged.parameter(ModeParameter::LlmWeight), 0.35);
    }

    #[test]
    fn test_block_on_disagreement_as_number() {
        let config = ModeConfig::defaults_for(TradingMode::Scalp);
        assert_eq!(config.parameter(ModeParameter::BlockOnDisagreement), 0.0);
        let patch = ModeConfig::parameter_patch(ModeParameter::BlockOnDisagreement, 1.0).unwrap();
        assert!(config.merge(&patch).unwrap().llm.block_on_disagreement);
    }
}
