//! Live per-mode configuration of one tenant

use crate::error::Result;
use async_trait::async_trait;
use log::info;
use sentinel_core::{ModeConfig, ModeConfigPatch, ModeParameter, TradingMode, UserSettings};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Where learner recommendations land
#[async_trait]
pub trait ParameterSink: Send + Sync {
    async fn current_value(&self, mode: TradingMode, param: ModeParameter) -> f64;

    async fn apply_parameter(&self, mode: TradingMode, param: ModeParameter, value: f64)
    -> Result<()>;
}

pub struct ModeConfigStore {
    modes: RwLock<BTreeMap<TradingMode, ModeConfig>>,
}

impl ModeConfigStore {
    pub fn new(modes: BTreeMap<TradingMode, ModeConfig>) -> Self {
        Self {
            modes: RwLock::new(modes),
        }
    }

    pub fn from_settings(settings: &UserSettings) -> Self {
        Self::new(
            TradingMode::ALL
                .iter()
                .map(|mode| (*mode, settings.mode(*mode)))
                .collect(),
        )
    }

    /// Config for a mode (built-in defaults if never set)
    pub async fn get(&self, mode: TradingMode) -> ModeConfig {
        self.modes
            .read()
            .await
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| ModeConfig::defaults_for(mode))
    }

    pub async fn all(&self) -> BTreeMap<TradingMode, ModeConfig> {
        let modes = self.modes.read().await;
        TradingMode::ALL
            .iter()
            .map(|mode| {
                let config = modes
                    .get(mode)
                    .cloned()
                    .unwrap_or_else(|| ModeConfig::defaults_for(*mode));
                (*mode, config)
            })
            .collect()
    }

    /// Merge a patch into one mode; nothing changes if validation fails
    pub async fn update(&self, mode: TradingMode, patch: &ModeConfigPatch) -> Result<ModeConfig> {
        let mut modes = self.modes.write().await;
        let current = modes
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| ModeConfig::defaults_for(mode));
        let merged = current.merge(patch)?;
        modes.insert(mode, merged.clone());
        info!("[CONFIG] {} config updated", mode);
        Ok(merged)
    }

    pub async fn replace(&self, mode: TradingMode, config: ModeConfig) -> Result<()> {
        config.validate()?;
        self.modes.write().await.insert(mode, config);
        Ok(())
    }

    pub async fn enabled_modes(&self) -> Vec<TradingMode> {
        self.all()
            .await
            .into_iter()
            .filter(|(_, c)| c.enabled)
            .map(|(mode, _)| mode)
            .collect()
    }
}

#[async_trait]
impl ParameterSink for ModeConfigStore {
    async fn current_value(&self, mode: TradingMode, param: ModeParameter) -> f64 {
        self.get(mode).await.parameter(param)
    }

    async fn apply_parameter(
        &self,
        mode: TradingMode,
        param: ModeParameter,
        value: f64,
    ) -> Result<()> {
        let patch = ModeConfig::parameter_patch(param, value)?;
        self.update(mode, &patch).await?;
        Ok(())
    }
}
