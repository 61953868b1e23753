//! In-memory persistence ports

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sentinel_core::{SignalLogEntry, TradeResult, UserId, UserSettings};
use sentinel_ports::{
    SettingsRepository, SignalLogStore, StoreError, StoreResult, TradeHistoryStore,
};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct MemorySettingsRepository {
    settings: DashMap<UserId, UserSettings>,
    fail_writes: AtomicBool,
}

impl MemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, settings: UserSettings) {
        self.settings.insert(user_id.to_string(), settings);
    }

    pub fn get(&self, user_id: &str) -> Option<UserSettings> {
        self.settings.get(user_id).map(|s| s.clone())
    }

    /// Make saves fail, as a down database would
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("settings store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn load_user_settings(&self, user_id: &UserId) -> StoreResult<Option<UserSettings>> {
        Ok(self.get(user_id))
    }

    async fn save_user_settings(
        &self,
        user_id: &UserId,
        settings: &UserSettings,
    ) -> StoreResult<()> {
        self.check_writable()?;
        self.settings.insert(user_id.clone(), settings.clone());
        Ok(())
    }

    async fn set_symbol_roi(
        &self,
        user_id: &UserId,
        symbol: &str,
        roi_percent: Option<Decimal>,
    ) -> StoreResult<()> {
        self.check_writable()?;
        let mut settings = self.settings.entry(user_id.clone()).or_default();
        match roi_percent {
            Some(roi) => settings.symbol_roi.insert(symbol.to_string(), roi),
            None => settings.symbol_roi.remove(symbol),
        };
        Ok(())
    }

    async fn auto_start_users(&self) -> StoreResult<Vec<UserId>> {
        let mut users: Vec<UserId> = self
            .settings
            .iter()
            .filter(|e| e.value().auto_start)
            .map(|e| e.key().clone())
            .collect();
        users.sort();
        Ok(users)
    }
}

#[derive(Default)]
pub struct MemoryTradeHistory {
    trades: DashMap<UserId, Vec<TradeResult>>,
}

impl MemoryTradeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, user_id: &str) -> usize {
        self.trades.get(user_id).map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TradeHistoryStore for MemoryTradeHistory {
    async fn append(&self, user_id: &UserId, trade: &TradeResult) -> StoreResult<()> {
        self.trades
            .entry(user_id.clone())
            .or_default()
            .push(trade.clone());
        Ok(())
    }

    /// Newest first
    async fn recent(&self, user_id: &UserId, limit: usize) -> StoreResult<Vec<TradeResult>> {
        Ok(self
            .trades
            .get(user_id)
            .map(|t| t.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemorySignalLogStore {
    entries: DashMap<UserId, Vec<SignalLogEntry>>,
}

impl MemorySignalLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, user_id: &str) -> Vec<SignalLogEntry> {
        self.entries
            .get(user_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SignalLogStore for MemorySignalLogStore {
    async fn append(&self, user_id: &UserId, entry: &SignalLogEntry) -> StoreResult<()> {
        self.entries
            .entry(user_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_symbol_roi_round_trip_and_auto_start() {
        let repo = MemorySettingsRepository::new();
        let user = "alice".to_string();
        repo.set_symbol_roi(&user, "BTCUSDT", Some(dec!(12))).await.unwrap();
        assert_eq!(repo.get("alice").unwrap().symbol_roi["BTCUSDT"], dec!(12));

        repo.set_symbol_roi(&user, "BTCUSDT", None).await.unwrap();
        assert!(repo.get("alice").unwrap().symbol_roi.is_empty());

        repo.insert(
            "bob",
            UserSettings {
                auto_start: true,
                ..UserSettings::default()
            },
        );
        assert_eq!(repo.auto_start_users().await.unwrap(), vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_write_reports_backend_error() {
        let repo = MemorySettingsRepository::new();
        repo.fail_writes(true);
        let err = repo
            .save_user_settings(&"alice".to_string(), &UserSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
