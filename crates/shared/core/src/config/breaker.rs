use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::error::{ConfigError, Result};

/// Circuit breaker limits. Loss limits are cumulative ROI percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Summed losses within the last hour that trip the breaker
    pub max_loss_per_hour: Decimal,
    /// Summed losses within the last 24 hours that trip the breaker
    pub max_daily_loss: Decimal,
    pub max_consecutive_losses: u32,
    pub cooldown_minutes: u32,
    pub max_trades_per_minute: u32,
    pub max_daily_trades: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_loss_per_hour: dec!(3.0),
            max_daily_loss: dec!(5.0),
            max_consecutive_losses: 5,
            cooldown_minutes: 30,
            max_trades_per_minute: 10,
            max_daily_trades: 100,
        }
    }
}

/// Partial update of [`CircuitBreakerConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerPatch {
    pub enabled: Option<bool>,
    pub max_loss_per_hour: Option<Decimal>,
    pub max_daily_loss: Option<Decimal>,
    pub max_consecutive_losses: Option<u32>,
    pub cooldown_minutes: Option<u32>,
    pub max_trades_per_minute: Option<u32>,
    pub max_daily_trades: Option<u32>,
}

impl CircuitBreakerPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl CircuitBreakerConfig {
    /// Apply a patch, returning the merged config. Limits must be positive.
    pub fn merge(&self, patch: &CircuitBreakerPatch) -> Result<Self> {
        let mut merged = self.clone();

        if let Some(enabled) = patch.enabled {
            merged.enabled = enabled;
        }
        if let Some(v) = patch.max_loss_per_hour {
            merged.max_loss_per_hour = positive_decimal("max_loss_per_hour", v)?;
        }
        if let Some(v) = patch.max_daily_loss {
            merged.max_daily_loss = positive_decimal("max_daily_loss", v)?;
        }
        if let Some(v) = patch.max_consecutive_losses {
            merged.max_consecutive_losses = positive_count("max_consecutive_losses", v)?;
        }
        if let Some(v) = patch.cooldown_minutes {
            merged.cooldown_minutes = positive_count("cooldown_minutes", v)?;
        }
        if let Some(v) = patch.max_trades_per_minute {
            merged.max_trades_per_minute = positive_count("max_trades_per_minute", v)?;
        }
        if let Some(v) = patch.max_daily_trades {
            merged.max_daily_trades = positive_count("max_daily_trades", v)?;
        }

        Ok(merged)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes))
    }
}

fn positive_decimal(field: &'static str, value: Decimal) -> Result<Decimal> {
    if value > Decimal::ZERO {
        Ok(value)
    } else {
        Err(ConfigError::NotPositive {
            field,
            value: value.to_string(),
        })
    }
}

fn positive_count(field: &'static str, value: u32) -> Result<u32> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ConfigError::NotPositive {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_patch_is_identity() {
        let config = CircuitBreakerConfig::default();
        let merged = config.merge(&CircuitBreakerPatch::default()).unwrap();
        assert_eq!(merged, config);
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let config = CircuitBreakerConfig::default();
        let patch = CircuitBreakerPatch {
            max_consecutive_losses: Some(3),
            enabled: Some(false),
            ..Default::default()
        };

        let merged = config.merge(&patch).unwrap();
        assert_eq!(merged.max_consecutive_losses, 3);
        assert!(!merged.enabled);
        assert_eq!(merged.max_daily_loss, config.max_daily_loss);
    }

    #[test]
    fn test_non_positive_limit_rejected() {
        let config = CircuitBreakerConfig::default();
        let patch = CircuitBreakerPatch {
            max_loss_per_hour: Some(dec!(-1)),
            ..Default::default()
        };

        let err = config.merge(&patch).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NotPositive {
                field: "max_loss_per_hour",
                ..
            }
        ));
    }

    #[test]
    fn test_patch_deserializes_sparse_json() {
        let patch: CircuitBreakerPatch =
            serde_json::from_str(r#"{"cooldown_minutes": 15}"#).unwrap();
        assert_eq!(patch.cooldown_minutes, Some(15));
        assert!(patch.max_daily_trades.is_none());
    }
}
