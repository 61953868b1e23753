//! Decision Engine
//!
//! Turns a technical scan, plus an optional LLM opinion, into an
//! EXECUTE/SKIP recommendation for one symbol in one mode.
//!
//! ```text
//!  TechnicalScan ──┬──────────────────────────────┐
//!                  │                              ▼
//!                  └─► cache? ─► LLM (timeout) ─► fuse ─► gates ─► Decision
//!                                                          │
//!                     min_confidence / disagreement / divergence
//! ```

use crate::fusion::{FusedSignal, Signal, fuse};
use crate::llm_cache::{CacheKey, LlmCache};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use sentinel_core::{
    DecisionContext, Direction, ModeConfig, Price, Symbol, TechnicalScan, TradingMode, Verdict,
};
use sentinel_ports::{Clock, LlmContext, LlmError, LlmOpinion, LlmProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stable rejection keys
pub mod reasons {
    pub const NO_SIGNAL: &str = "no_signal";
    pub const LOW_CONFIDENCE: &str = "low_confidence";
    pub const LLM_TIMEOUT: &str = "llm_timeout";
    pub const LLM_DISAGREEMENT: &str = "llm_disagreement";
    pub const DIVERGENCE: &str = "divergence";
    pub const INVALID_SCAN: &str = "invalid_scan";
}

/// Recommendation for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: Symbol,
    pub mode: TradingMode,
    pub price: Price,
    pub atr_percent: Decimal,
    /// `Neutral` means no action
    pub action: Direction,
    pub confidence: f64,
    pub verdict: Verdict,
    pub reasoning: String,
    pub rejection_reason: Option<String>,
    pub context: DecisionContext,
    /// LLM opinion that took part in the fusion, if any
    pub llm_opinion: Option<LlmOpinion>,
}

impl Decision {
    pub fn is_execute(&self) -> bool {
        self.verdict == Verdict::Execute
    }
}

/// What the LLM step produced
enum LlmStep {
    Used { opinion: LlmOpinion, cached: bool },
    Skipped(&'static str),
    /// Timed out with `skip_on_timeout` off: the whole signal is dropped
    Abort,
}

pub struct DecisionEngine {
    llm: Option<Arc<dyn LlmProvider>>,
    cache: LlmCache,
}

impl DecisionEngine {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            llm,
            cache: LlmCache::new(clock),
        }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    pub fn cache(&self) -> &LlmCache {
        &self.cache
    }

    /// Evaluate a scan under a mode's config.
    ///
    /// `llm_allowed` is the tenant-wide LLM switch; the mode's own
    /// `llm.enabled` must also be on for the provider to be asked.
    pub async fn decide(
        &self,
        scan: &TechnicalScan,
        mode: TradingMode,
        config: &ModeConfig,
        llm_allowed: bool,
    ) -> Decision {
        let technical = Signal::new(scan.direction, scan.confidence);
        let mut context = DecisionContext::technical_only(scan.direction, scan.confidence);

        if !scan.confidence.is_finite() {
            warn!(
                "[DECISION] {} {} scan confidence is not a number, skipped",
                mode, scan.symbol
            );
            return skip(
                scan,
                mode,
                Direction::Neutral,
                0.0,
                context,
                None,
                reasons::INVALID_SCAN,
                "technical confidence is not a finite number".to_string(),
            );
        }

        let step = if llm_allowed && config.llm.enabled {
            self.consult_llm(scan, mode, config).await
        } else {
            LlmStep::Skipped("llm_disabled")
        };

        let (llm_signal, llm_opinion) = match step {
            LlmStep::Used { opinion, cached } => {
                context.llm_direction = Some(opinion.direction);
                context.llm_confidence = Some(opinion.confidence);
                context.llm_provider = Some(opinion.provider.clone());
                context.used_cache = cached;
                context.skipped_llm = false;
                (
                    Some(Signal::new(opinion.direction, opinion.confidence)),
                    Some(opinion),
                )
            }
            LlmStep::Skipped(reason) => {
                context.skip_reason = Some(reason.to_string());
                (None, None)
            }
            LlmStep::Abort => {
                context.skip_reason = Some(reasons::LLM_TIMEOUT.to_string());
                return skip(
                    scan,
                    mode,
                    Direction::Neutral,
                    0.0,
                    context,
                    None,
                    reasons::LLM_TIMEOUT,
                    "LLM timed out and this mode does not trade without it".to_string(),
                );
            }
        };

        let fused = fuse(technical, llm_signal, config.llm.weight);
        context.final_confidence = fused.confidence;
        context.agreement = fused.agreement;
        let reasoning = describe(scan, &fused, llm_opinion.as_ref());

        if let Some((key, why)) = gate(scan, config, &fused, llm_opinion.is_some()) {
            debug!(
                "[DECISION] {} {} skipped: {} ({})",
                mode, scan.symbol, key, why
            );
            return skip(
                scan,
                mode,
                fused.direction,
                fused.confidence,
                context,
                llm_opinion,
                key,
                format!("{}; {}", reasoning, why),
            );
        }

        info!(
            "[DECISION] {} {} EXECUTE {:?} @ {:.1}",
            mode, scan.symbol, fused.direction, fused.confidence
        );
        Decision {
            symbol: scan.symbol.clone(),
            mode,
            price: scan.price,
            atr_percent: scan.atr_percent,
            action: fused.direction,
            confidence: fused.confidence,
            verdict: Verdict::Execute,
            reasoning,
            rejection_reason: None,
            context,
            llm_opinion,
        }
    }

    async fn consult_llm(
        &self,
        scan: &TechnicalScan,
        mode: TradingMode,
        config: &ModeConfig,
    ) -> LlmStep {
        let Some(provider) = &self.llm else {
            return LlmStep::Skipped("no_provider");
        };

        let key = CacheKey::for_scan(scan, mode);
        let ttl = chrono::Duration::seconds(config.llm.cache_ttl_secs as i64);
        let cached = if config.llm.cache_enabled {
            self.cache.get(&key, ttl)
        } else {
            None
        };

        let (opinion, from_cache) = match cached {
            Some(opinion) => (opinion, true),
            None => {
                let timeout = config.llm_timeout();
                let request = LlmContext {
                    symbol: scan.symbol.clone(),
                    mode,
                    price: scan.price,
                    technical_direction: scan.direction,
                    technical_confidence: scan.confidence,
                    scan_summary: summarize(scan),
                };
                let answer =
                    tokio::time::timeout(timeout, provider.generate_decision(&request, timeout))
                        .await
                        .unwrap_or(Err(LlmError::Timeout {
                            after_ms: config.llm.timeout_ms,
                        }));

                match answer {
                    Ok(opinion) if !opinion.confidence.is_finite() => {
                        warn!(
                            "[DECISION] {} {} LLM confidence is not a number, technical only",
                            mode, scan.symbol
                        );
                        return LlmStep::Skipped("llm_error");
                    }
                    Ok(opinion) => {
                        if config.llm.cache_enabled {
                            self.cache.insert(key, opinion.clone());
                        }
                        (opinion, false)
                    }
                    Err(LlmError::Timeout { after_ms }) => {
                        warn!(
                            "[DECISION] {} {} LLM timed out after {}ms",
                            mode, scan.symbol, after_ms
                        );
                        return if config.llm.skip_on_timeout {
                            LlmStep::Skipped(reasons::LLM_TIMEOUT)
                        } else {
                            LlmStep::Abort
                        };
                    }
                    Err(e) => {
                        warn!(
                            "[DECISION] {} {} LLM unavailable, technical only: {}",
                            mode, scan.symbol, e
                        );
                        return LlmStep::Skipped("llm_error");
                    }
                }
            }
        };

        if !(opinion.confidence >= config.llm.min_confidence) {
            return LlmStep::Skipped("llm_low_confidence");
        }
        LlmStep::Used {
            opinion,
            cached: from_cache,
        }
    }
}

/// First failing gate as `(key, explanation)`
fn gate(
    scan: &TechnicalScan,
    config: &ModeConfig,
    fused: &FusedSignal,
    llm_used: bool,
) -> Option<(&'static str, String)> {
    if fused.direction.is_neutral() {
        return Some((reasons::NO_SIGNAL, "no directional signal".to_string()));
    }
    if !(fused.confidence >= config.min_confidence) {
        return Some((
            reasons::LOW_CONFIDENCE,
            format!(
                "confidence {:.1} below {:.1}",
                fused.confidence, config.min_confidence
            ),
        ));
    }
    // Opinions under llm.min_confidence never reach fusion, so that is
    // also the disagreement threshold
    if config.llm.block_on_disagreement && llm_used && !fused.agreement {
        return Some((
            reasons::LLM_DISAGREEMENT,
            "LLM disagrees with the technical signal".to_string(),
        ));
    }
    if config.divergence.block_on_divergence {
        if let Some(trend) = scan.trend(&config.divergence.higher_timeframe) {
            if fused.direction.conflicts_with(trend.direction) {
                return Some((
                    reasons::DIVERGENCE,
                    format!(
                        "{:?} against the {} trend ({:?})",
                        fused.direction, trend.timeframe, trend.direction
                    ),
                ));
            }
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn skip(
    scan: &TechnicalScan,
    mode: TradingMode,
    action: Direction,
    confidence: f64,
    context: DecisionContext,
    llm_opinion: Option<LlmOpinion>,
    reason: &str,
    reasoning: String,
) -> Decision {
    Decision {
        symbol: scan.symbol.clone(),
        mode,
        price: scan.price,
        atr_percent: scan.atr_percent,
        action,
        confidence,
        verdict: Verdict::Skip,
        reasoning,
        rejection_reason: Some(reason.to_string()),
        context,
        llm_opinion,
    }
}

fn summarize(scan: &TechnicalScan) -> String {
    let trends: Vec<String> = scan
        .trends
        .iter()
        .map(|t| format!("{}:{:?}({:.0})", t.timeframe, t.direction, t.strength))
        .collect();
    format!(
        "{:?} {:.0}% ATR {}% [{}]",
        scan.direction,
        scan.confidence,
        scan.atr_percent,
        trends.join(" ")
    )
}

fn describe(scan: &TechnicalScan, fused: &FusedSignal, llm: Option<&LlmOpinion>) -> String {
    let tech = format!("tech {:?} {:.0}", scan.direction, scan.confidence);
    match llm {
        Some(opinion) => format!(
            "{}, {} {:?} {:.0}, fused {:?} {:.1}{}",
            tech,
            opinion.provider,
            opinion.direction,
            opinion.confidence,
            fused.direction,
            fused.confidence,
            if fused.agreement { "" } else { " (conflict)" }
        ),
        None => format!("{}, fused {:?} {:.1}", tech, fused.direction, fused.confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_sim::{ScriptedLlm, technical_scan};
    use rust_decimal_macros::dec;
    use sentinel_clock::ManualClock;
    use std::time::Duration;

    fn scalp(min_confidence: f64) -> ModeConfig {
        let mut config = ModeConfig::defaults_for(TradingMode::Scalp);
        config.min_confidence = min_confidence;
        config
    }

    fn engine(llm: Option<Arc<ScriptedLlm>>) -> DecisionEngine {
        DecisionEngine::new(
            llm.map(|l| l as Arc<dyn LlmProvider>),
            ManualClock::new(None),
        )
    }

    #[tokio::test]
    async fn test_below_min_confidence_skips() {
        let scan = technical_scan("BTCUSDT", Direction::Long, 65.0, dec!(100), dec!(1));
        let decision = engine(None)
            .decide(&scan, TradingMode::Scalp, &scalp(70.0), true)
            .await;
        assert_eq!(decision.verdict, Verdict::Skip);
        assert_eq!(decision.rejection_reason.as_deref(), Some(reasons::LOW_CONFIDENCE));
    }

    #[tokio::test]
    async fn test_confident_signal_executes() {
        let scan = technical_scan("BTCUSDT", Direction::Long, 85.0, dec!(100), dec!(1));
        let decision = engine(None)
            .decide(&scan, TradingMode::Scalp, &scalp(70.0), true)
            .await;
        assert!(decision.is_execute());
        assert_eq!(decision.action, Direction::Long);
        assert!(decision.context.skipped_llm);
    }

    #[tokio::test]
    async fn test_llm_opinion_is_cached() {
        let llm = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Long, 80.0)));
        let engine = engine(Some(llm.clone()));
        let scan = technical_scan("BTCUSDT", Direction::Long, 70.0, dec!(100), dec!(1));

        let first = engine.decide(&scan, TradingMode::Scalp, &scalp(60.0), true).await;
        let second = engine.decide(&scan, TradingMode::Scalp, &scalp(60.0), true).await;

        assert_eq!(llm.calls(), 1);
        assert!(!first.context.used_cache);
        assert!(second.context.used_cache);
        // 70*0.8 + 80*0.2 + 10
        assert!((second.confidence - 82.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_nan_llm_confidence_falls_back_to_technical() {
        let llm = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Long, f64::NAN)));
        let scan = technical_scan("BTCUSDT", Direction::Long, 20.0, dec!(100), dec!(1));

        let decision = engine(Some(llm))
            .decide(&scan, TradingMode::Scalp, &scalp(70.0), true)
            .await;
        assert_eq!(decision.verdict, Verdict::Skip);
        assert_eq!(decision.rejection_reason.as_deref(), Some(reasons::LOW_CONFIDENCE));
        assert_eq!(decision.context.skip_reason.as_deref(), Some("llm_error"));
        assert!(decision.confidence.is_finite());
    }

    #[tokio::test]
    async fn test_nan_scan_confidence_is_skipped() {
        let llm = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Long, 90.0)));
        let scan = technical_scan("BTCUSDT", Direction::Long, f64::NAN, dec!(100), dec!(1));

        let decision = engine(Some(llm.clone()))
            .decide(&scan, TradingMode::Scalp, &scalp(10.0), true)
            .await;
        assert_eq!(decision.verdict, Verdict::Skip);
        assert_eq!(decision.rejection_reason.as_deref(), Some(reasons::INVALID_SCAN));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_disagreement_blocks_when_configured() {
        let llm = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Short, 70.0)));
        let mut config = ModeConfig::defaults_for(TradingMode::Swing);
        config.min_confidence = 10.0;
        config.divergence.block_on_divergence = false;
        let scan = technical_scan("ETHUSDT", Direction::Long, 90.0, dec!(100), dec!(2));

        let decision = engine(Some(llm))
            .decide(&scan, TradingMode::Swing, &config, true)
            .await;
        assert_eq!(
            decision.rejection_reason.as_deref(),
            Some(reasons::LLM_DISAGREEMENT)
        );
        assert!(!decision.context.agreement);
    }

    #[tokio::test]
    async fn test_low_confidence_llm_opinion_is_ignored() {
        // Scalp ignores opinions under 50
        let llm = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Short, 30.0)));
        let scan = technical_scan("BTCUSDT", Direction::Long, 75.0, dec!(100), dec!(1));
        let decision = engine(Some(llm))
            .decide(&scan, TradingMode::Scalp, &scalp(60.0), true)
            .await;
        assert!(decision.is_execute());
        assert_eq!(decision.confidence, 75.0);
        assert_eq!(
            decision.context.skip_reason.as_deref(),
            Some("llm_low_confidence")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_skip_or_abort_by_mode() {
        let llm = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Long, 90.0)));
        llm.set_latency(Duration::from_secs(60)).await;
        let engine = engine(Some(llm));
        let scan = technical_scan("BTCUSDT", Direction::Long, 80.0, dec!(100), dec!(1));

        // Scalp proceeds technical-only
        let scalp_decision = engine
            .decide(&scan, TradingMode::Scalp, &scalp(60.0), true)
            .await;
        assert!(scalp_decision.is_execute());
        assert_eq!(
            scalp_decision.context.skip_reason.as_deref(),
            Some(reasons::LLM_TIMEOUT)
        );

        // Swing drops the signal
        let mut swing = ModeConfig::defaults_for(TradingMode::Swing);
        swing.divergence.block_on_divergence = false;
        let swing_decision = engine.decide(&scan, TradingMode::Swing, &swing, true).await;
        assert_eq!(swing_decision.verdict, Verdict::Skip);
        assert_eq!(
            swing_decision.rejection_reason.as_deref(),
            Some(reasons::LLM_TIMEOUT)
        );
    }

    #[tokio::test]
    async fn test_divergence_against_higher_timeframe() {
        let mut scan = technical_scan("BTCUSDT", Direction::Long, 90.0, dec!(100), dec!(1));
        for trend in scan.trends.iter_mut().filter(|t| t.timeframe == "4h") {
            trend.direction = Direction::Short;
        }
        let config = ModeConfig::defaults_for(TradingMode::Swing);
        let decision = engine(None)
            .decide(&scan, TradingMode::Swing, &config, false)
            .await;
        assert_eq!(decision.rejection_reason.as_deref(), Some(reasons::DIVERGENCE));
    }
}
