//! Deterministic scanner and LLM stand-ins

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sentinel_core::{Direction, Price, Symbol, TechnicalScan, TimeframeTrend, TradingMode};
use sentinel_ports::{
    Clock, LlmContext, LlmError, LlmOpinion, LlmProvider, LlmResult, MarketScanner, ScanError,
    ScanResult,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Scan with the same trend on every standard timeframe
pub fn technical_scan(
    symbol: &str,
    direction: Direction,
    confidence: f64,
    price: Price,
    atr_percent: Decimal,
) -> TechnicalScan {
    TechnicalScan {
        symbol: symbol.to_string(),
        mode: TradingMode::Scalp,
        price,
        direction,
        confidence,
        atr_percent,
        trends: ["5m", "1h", "4h", "1d"]
            .iter()
            .map(|tf| TimeframeTrend {
                timeframe: tf.to_string(),
                direction,
                strength: confidence,
            })
            .collect(),
        scanned_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Scanner that replays configured scans
pub struct ScriptedScanner {
    clock: Arc<dyn Clock>,
    candidates: DashMap<TradingMode, Vec<Symbol>>,
    scans: DashMap<Symbol, TechnicalScan>,
    failing: DashMap<Symbol, String>,
    delay: RwLock<Duration>,
    scan_calls: AtomicUsize,
}

impl ScriptedScanner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            candidates: DashMap::new(),
            scans: DashMap::new(),
            failing: DashMap::new(),
            delay: RwLock::new(Duration::ZERO),
            scan_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_candidates(&self, mode: TradingMode, symbols: &[&str]) {
        self.candidates
            .insert(mode, symbols.iter().map(|s| s.to_string()).collect());
    }

    /// Scan returned for a symbol in any mode (mode and time are filled in)
    pub fn set_scan(&self, scan: TechnicalScan) {
        self.scans.insert(scan.symbol.clone(), scan);
    }

    pub fn fail_symbol(&self, symbol: &str, message: &str) {
        self.failing.insert(symbol.to_string(), message.to_string());
    }

    /// Delay every scan, to keep a tick in flight
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketScanner for ScriptedScanner {
    async fn candidates(&self, mode: TradingMode) -> ScanResult<Vec<Symbol>> {
        Ok(self
            .candidates
            .get(&mode)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn scan(&self, symbol: &str, mode: TradingMode) -> ScanResult<TechnicalScan> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failing.get(symbol) {
            return Err(ScanError::Backend(message.clone()));
        }
        let mut scan = self
            .scans
            .get(symbol)
            .map(|s| s.clone())
            .ok_or_else(|| ScanError::NoData(symbol.to_string()))?;
        scan.mode = mode;
        scan.scanned_at = self.clock.now();
        Ok(scan)
    }
}

// ============================================================================
// LLM
// ============================================================================

/// LLM provider with a fixed answer and configurable latency
pub struct ScriptedLlm {
    name: String,
    response: RwLock<LlmResult<LlmOpinion>>,
    latency: RwLock<Duration>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(opinion: LlmOpinion) -> Self {
        Self {
            name: opinion.provider.clone(),
            response: RwLock::new(Ok(opinion)),
            latency: RwLock::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    /// Opinion with no SL/TP suggestion
    pub fn opinion(direction: Direction, confidence: f64) -> LlmOpinion {
        LlmOpinion {
            direction,
            confidence,
            reasoning: format!("scripted {:?}", direction),
            stop_loss: None,
            take_profit: None,
            risk_level: None,
            provider: "scripted".to_string(),
        }
    }

    pub async fn respond_with(&self, response: LlmResult<LlmOpinion>) {
        *self.response.write().await = response;
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate_decision(
        &self,
        _context: &LlmContext,
        timeout: Duration,
    ) -> LlmResult<LlmOpinion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read().await;
        if latency >= timeout {
            tokio::time::sleep(timeout).await;
            return Err(LlmError::Timeout {
                after_ms: timeout.as_millis() as u64,
            });
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.response.read().await.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_clock::ManualClock;

    #[tokio::test]
    async fn test_scan_fills_mode_and_time() {
        let clock = ManualClock::new(None);
        let scanner = ScriptedScanner::new(clock.clone());
        scanner.set_scan(technical_scan("BTCUSDT", Direction::Long, 80.0, dec!(100), dec!(1)));

        let scan = scanner.scan("BTCUSDT", TradingMode::Swing).await.unwrap();
        assert_eq!(scan.mode, TradingMode::Swing);
        assert_eq!(scan.scanned_at, clock.now());
        assert!(matches!(
            scanner.scan("ETHUSDT", TradingMode::Swing).await,
            Err(ScanError::NoData(_))
        ));
        assert_eq!(scanner.scan_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_llm_times_out() {
        let llm = ScriptedLlm::new(ScriptedLlm::opinion(Direction::Short, 70.0));
        llm.set_latency(Duration::from_secs(30)).await;
        let context = LlmContext {
            symbol: "BTCUSDT".to_string(),
            mode: TradingMode::Scalp,
            price: dec!(100),
            technical_direction: Direction::Long,
            technical_confidence: 60.0,
            scan_summary: String::new(),
        };
        let result = llm.generate_decision(&context, Duration::from_secs(5)).await;
        assert_eq!(result, Err(LlmError::Timeout { after_ms: 5000 }));
    }
}
