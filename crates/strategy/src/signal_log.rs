//! Bounded per-tenant audit trail of decisions

use crate::decision::Decision;
use log::warn;
use sentinel_core::{SignalLogEntry, SignalStatus, Timestamp, UserId};
use sentinel_ports::SignalLogStore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_SIGNAL_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalStats {
    pub total: usize,
    pub executed: usize,
    pub rejected: usize,
    pub pending: usize,
    /// Executed share of all entries (percent)
    pub execution_rate: f64,
}

/// Log entry for a decision; id is `{symbol}_{nanos}`
pub fn entry_for(
    decision: &Decision,
    status: SignalStatus,
    rejection_reason: Option<String>,
    at: Timestamp,
) -> SignalLogEntry {
    SignalLogEntry {
        id: format!(
            "{}_{}",
            decision.symbol,
            at.timestamp_nanos_opt().unwrap_or_default()
        ),
        symbol: decision.symbol.clone(),
        mode: decision.mode,
        direction: decision.action,
        confidence: decision.confidence,
        verdict: decision.verdict,
        status,
        rejection_reason,
        reasoning: decision.reasoning.clone(),
        timestamp: at,
    }
}

pub struct SignalLog {
    user_id: UserId,
    capacity: usize,
    entries: RwLock<VecDeque<SignalLogEntry>>,
    store: Option<Arc<dyn SignalLogStore>>,
}

impl SignalLog {
    pub fn new(
        user_id: impl Into<UserId>,
        capacity: usize,
        store: Option<Arc<dyn SignalLogStore>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
            store,
        }
    }

    /// Append, evicting the oldest entry when full. The store copy is
    /// best-effort.
    pub async fn record(&self, entry: SignalLogEntry) {
        {
            let mut entries = self.entries.write().await;
            entries.push_back(entry.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.append(&self.user_id, &entry).await {
                warn!(
                    "[DECISION] {} could not persist signal {}: {}",
                    self.user_id, entry.id, e
                );
            }
        }
    }

    /// Newest first
    pub async fn recent(&self, limit: usize) -> Vec<SignalLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Resolve a pending entry; returns false if the id is unknown
    pub async fn update_status(
        &self,
        id: &str,
        status: SignalStatus,
        rejection_reason: Option<String>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().rev().find(|e| e.id == id) {
            Some(entry) => {
                entry.status = status;
                entry.rejection_reason = rejection_reason;
                true
            }
            None => false,
        }
    }

    pub async fn stats(&self) -> SignalStats {
        let entries = self.entries.read().await;
        let mut stats = SignalStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.iter() {
            match entry.status {
                SignalStatus::Executed => stats.executed += 1,
                SignalStatus::Rejected => stats.rejected += 1,
                SignalStatus::Pending => stats.pending += 1,
            }
        }
        if stats.total > 0 {
            stats.execution_rate = stats.executed as f64 / stats.total as f64 * 100.0;
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use exchange_sim::MemorySignalLogStore;
    use sentinel_core::{Direction, TradingMode, Verdict};

    fn entry(n: i64, status: SignalStatus) -> SignalLogEntry {
        let at = Utc::now() + Duration::seconds(n);
        SignalLogEntry {
            id: format!("BTCUSDT_{}", n),
            symbol: "BTCUSDT".to_string(),
            mode: TradingMode::Scalp,
            direction: Direction::Long,
            confidence: 70.0,
            verdict: Verdict::Execute,
            status,
            rejection_reason: None,
            reasoning: String::new(),
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn test_bounded_and_newest_first() {
        let log = SignalLog::new("alice", 3, None);
        for n in 0..5 {
            log.record(entry(n, SignalStatus::Executed)).await;
        }
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, "BTCUSDT_4");
        assert_eq!(recent[2].id, "BTCUSDT_2");
    }

    #[tokio::test]
    async fn test_stats_and_store_forwarding() {
        let store = Arc::new(MemorySignalLogStore::new());
        let log = SignalLog::new("alice", 10, Some(store.clone()));
        log.record(entry(1, SignalStatus::Executed)).await;
        log.record(entry(2, SignalStatus::Rejected)).await;
        log.record(entry(3, SignalStatus::Pending)).await;
        log.record(entry(4, SignalStatus::Executed)).await;

        assert!(log.update_status("BTCUSDT_3", SignalStatus::Rejected, Some("risk".into())).await);
        let stats = log.stats().await;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.execution_rate, 50.0);
        assert_eq!(store.entries("alice").len(), 4);
    }
}
