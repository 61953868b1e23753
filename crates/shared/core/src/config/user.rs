use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CircuitBreakerConfig, ModeConfig};
use crate::entities::TradingMode;
use crate::values::Symbol;

/// Provider selection shared by every mode of a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmGlobalConfig {
    pub enabled: bool,
    pub provider: String,
    pub fallback_provider: Option<String>,
}

impl Default for LlmGlobalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "deepseek".to_string(),
            fallback_provider: Some("claude".to_string()),
        }
    }
}

/// Everything the engine needs to know about one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Paper trading against the simulated exchange
    pub dry_run: bool,
    /// Start the engine automatically when the process boots
    pub auto_start: bool,
    pub modes: BTreeMap<TradingMode, ModeConfig>,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Saved per-symbol ROI targets (percent)
    pub symbol_roi: BTreeMap<Symbol, Decimal>,
    pub llm: LlmGlobalConfig,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            auto_start: false,
            modes: TradingMode::ALL
                .iter()
                .map(|mode| (*mode, ModeConfig::defaults_for(*mode)))
                .collect(),
            circuit_breaker: CircuitBreakerConfig::default(),
            symbol_roi: BTreeMap::new(),
            llm: LlmGlobalConfig::default(),
        }
    }
}

impl UserSettings {
    /// Config for a mode, falling back to the built-in defaults
    pub fn mode(&self, mode: TradingMode) -> ModeConfig {
        self.modes
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| ModeConfig::defaults_for(mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_cover_all_modes() {
        let settings = UserSettings::default();
        assert_eq!(settings.modes.len(), 4);
        assert!(settings.dry_run);
    }

    #[test]
    fn test_missing_mode_falls_back_to_defaults() {
        let mut settings = UserSettings::default();
        settings.modes.remove(&TradingMode::Swing);
        assert_eq!(
            settings.mode(TradingMode::Swing),
            ModeConfig::defaults_for(TradingMode::Swing)
        );
    }
}
