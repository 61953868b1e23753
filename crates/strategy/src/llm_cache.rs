//! LLM response cache keyed by (symbol, mode, scan fingerprint)

use chrono::Duration;
use dashmap::DashMap;
use log::debug;
use sentinel_core::{Symbol, TechnicalScan, Timestamp, TradingMode};
use sentinel_ports::{Clock, LlmOpinion};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: Symbol,
    pub mode: TradingMode,
    pub fingerprint: u64,
}

impl CacheKey {
    pub fn for_scan(scan: &TechnicalScan, mode: TradingMode) -> Self {
        Self {
            symbol: scan.symbol.clone(),
            mode,
            fingerprint: scan.fingerprint(),
        }
    }
}

struct CachedOpinion {
    opinion: LlmOpinion,
    stored_at: Timestamp,
}

pub struct LlmCache {
    entries: DashMap<CacheKey, CachedOpinion>,
    clock: Arc<dyn Clock>,
}

impl LlmCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Cached opinion younger than `ttl`; expired entries are dropped on read
    pub fn get(&self, key: &CacheKey, ttl: Duration) -> Option<LlmOpinion> {
        let now = self.clock.now();
        let hit = self.entries.get(key).and_then(|entry| {
            (now - entry.stored_at <= ttl).then(|| entry.opinion.clone())
        });
        if hit.is_none() && self.entries.remove(key).is_some() {
            debug!("[DECISION] Cache entry for {} expired", key.symbol);
        }
        hit
    }

    pub fn insert(&self, key: CacheKey, opinion: LlmOpinion) {
        self.entries.insert(
            key,
            CachedOpinion {
                opinion,
                stored_at: self.clock.now(),
            },
        );
    }

    /// Drop entries older than `ttl`; returns how many were removed
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.stored_at <= ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_clock::ManualClock;
    use sentinel_core::{Direction, TimeframeTrend};

    fn scan(confidence: f64) -> TechnicalScan {
        TechnicalScan {
            symbol: "BTCUSDT".to_string(),
            mode: TradingMode::Scalp,
            price: dec!(50000),
            direction: Direction::Long,
            confidence,
            atr_percent: dec!(1),
            trends: vec![TimeframeTrend {
                timeframe: "1h".to_string(),
                direction: Direction::Long,
                strength: 50.0,
            }],
            scanned_at: chrono::Utc::now(),
        }
    }

    fn opinion() -> LlmOpinion {
        LlmOpinion {
            direction: Direction::Long,
            confidence: 70.0,
            reasoning: "trend".to_string(),
            stop_loss: None,
            take_profit: None,
            risk_level: None,
            provider: "test".to_string(),
        }
    }

    #[test]
    fn test_hit_until_ttl_then_expire() {
        let clock = ManualClock::new(None);
        let cache = LlmCache::new(clock.clone());
        let key = CacheKey::for_scan(&scan(72.0), TradingMode::Scalp);
        cache.insert(key.clone(), opinion());

        // Same confidence bucket shares the key
        let same_bucket = CacheKey::for_scan(&scan(73.0), TradingMode::Scalp);
        assert!(cache.get(&same_bucket, Duration::seconds(300)).is_some());

        clock.advance(Duration::seconds(301));
        assert!(cache.get(&key, Duration::seconds(300)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mode_is_part_of_key() {
        let cache = LlmCache::new(ManualClock::new(None));
        cache.insert(CacheKey::for_scan(&scan(72.0), TradingMode::Scalp), opinion());
        let swing = CacheKey::for_scan(&scan(72.0), TradingMode::Swing);
        assert!(cache.get(&swing, Duration::seconds(300)).is_none());
    }
}
