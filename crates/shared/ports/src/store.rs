use async_trait::async_trait;
use rust_decimal::Decimal;
use sentinel_core::{SignalLogEntry, TradeResult, UserId, UserSettings};

use crate::error::StoreResult;

/// Settings persistence (global + per-mode + per-user)
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Stored settings for a user, `None` if the user never saved any
    async fn load_user_settings(&self, user_id: &UserId) -> StoreResult<Option<UserSettings>>;

    async fn save_user_settings(&self, user_id: &UserId, settings: &UserSettings)
    -> StoreResult<()>;

    /// Persist (or clear, with `None`) a per-symbol ROI target
    async fn set_symbol_roi(
        &self,
        user_id: &UserId,
        symbol: &str,
        roi_percent: Option<Decimal>,
    ) -> StoreResult<()>;

    /// Users whose settings ask for the engine to start on boot
    async fn auto_start_users(&self) -> StoreResult<Vec<UserId>>;
}

/// Closed-trade persistence
#[async_trait]
pub trait TradeHistoryStore: Send + Sync {
    async fn append(&self, user_id: &UserId, trade: &TradeResult) -> StoreResult<()>;

    /// Most recent trades first
    async fn recent(&self, user_id: &UserId, limit: usize) -> StoreResult<Vec<TradeResult>>;
}

/// Signal audit persistence
#[async_trait]
pub trait SignalLogStore: Send + Sync {
    async fn append(&self, user_id: &UserId, entry: &SignalLogEntry) -> StoreResult<()>;
}
