//! Adaptive Learner
//!
//! Aggregates closed trades per mode and turns weak patterns into
//! parameter recommendations. Nothing changes until a recommendation is
//! applied, and applying goes through a [`ParameterSink`].
//!
//! ```text
//!  TradeResult ──► outcomes (≤1000) ──► due? ──► stats by mode ──► rules
//!                                                                   │
//!                          apply / dismiss / apply_all ◄── pending ◄┘
//! ```

use crate::error::{Error, Result};
use crate::mode_config::ParameterSink;
use chrono::Duration;
use log::{info, warn};
use rust_decimal::Decimal;
use sentinel_core::{
    DecisionContext, Direction, ModeParameter, Symbol, Timestamp, TradeOutcome, TradeResult,
    TradingMode,
};
use sentinel_ports::{Clock, ItemError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Analyse after this many new trades
    pub trades_per_analysis: usize,
    /// ...or after this long, given `min_trades_for_interval` new trades
    pub analysis_interval: Duration,
    pub min_trades_for_interval: usize,
    pub max_outcomes: usize,
    pub min_total_outcomes: usize,
    pub min_mode_outcomes: usize,
    /// Samples a rule needs before it may fire
    pub min_rule_samples: usize,
    pub min_statistical_confidence: f64,
    /// Pseudo-count in `n / (n + prior)`
    pub confidence_prior: f64,
    /// Applied or dismissed recommendations kept for display; oldest go first
    pub max_resolved_recommendations: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            trades_per_analysis: 50,
            analysis_interval: Duration::hours(24),
            min_trades_for_interval: 10,
            max_outcomes: 1000,
            min_total_outcomes: 10,
            min_mode_outcomes: 5,
            min_rule_samples: 5,
            min_statistical_confidence: 0.5,
            confidence_prior: 5.0,
            max_resolved_recommendations: 200,
        }
    }
}

/// One closed trade as the learner sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedOutcome {
    pub trade_id: Uuid,
    pub symbol: Symbol,
    pub mode: TradingMode,
    pub direction: Direction,
    pub pnl_percent: Decimal,
    pub realized_pnl: Decimal,
    pub outcome: TradeOutcome,
    pub decision: Option<DecisionContext>,
    pub closed_at: Timestamp,
}

impl From<&TradeResult> for LearnedOutcome {
    fn from(trade: &TradeResult) -> Self {
        Self {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            mode: trade.mode,
            direction: trade.direction(),
            pnl_percent: trade.pnl_percent,
            realized_pnl: trade.realized_pnl,
            outcome: trade.outcome(),
            decision: trade.decision.clone(),
            closed_at: trade.closed_at,
        }
    }
}

impl LearnedOutcome {
    fn is_win(&self) -> bool {
        self.outcome == TradeOutcome::Win
    }

    /// Executed against the technical signal, on the LLM's word
    fn is_llm_led(&self) -> bool {
        self.decision.as_ref().is_some_and(|d| {
            !d.agreement && d.llm_direction == Some(self.direction)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Applied,
    Dismissed,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Applied => "applied",
            RecommendationStatus::Dismissed => "dismissed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub mode: TradingMode,
    pub parameter: ModeParameter,
    pub current_value: f64,
    pub suggested_value: f64,
    /// Statistical confidence 0-1
    pub confidence: f64,
    pub sample_size: usize,
    pub reasoning: String,
    pub status: RecommendationStatus,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

/// Win rates are percentages; zero when the bucket is empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeStats {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakeven: usize,
    pub win_rate: f64,
    pub total_pnl_percent: Decimal,
    pub agreement_trades: usize,
    pub agreement_win_rate: f64,
    pub disagreement_trades: usize,
    pub disagreement_win_rate: f64,
    pub llm_led_trades: usize,
    pub llm_led_win_rate: f64,
    /// Final confidence 50-65
    pub low_confidence_trades: usize,
    pub low_confidence_win_rate: f64,
    /// 65-80
    pub medium_confidence_trades: usize,
    pub medium_confidence_win_rate: f64,
    /// 80-100
    pub high_confidence_trades: usize,
    pub high_confidence_win_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgreementPatterns {
    pub both_long: usize,
    pub both_long_win_rate: f64,
    pub both_short: usize,
    pub both_short_win_rate: f64,
    /// Technical took a side the LLM did not share
    pub technical_only: usize,
    pub technical_only_win_rate: f64,
    /// LLM took a side the technical signal did not share
    pub llm_only: usize,
    pub llm_only_win_rate: f64,
    pub disagreement: usize,
    pub disagreement_win_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyAllReport {
    pub applied: usize,
    pub errors: Vec<ItemError>,
}

#[derive(Default)]
struct Tally {
    n: usize,
    wins: usize,
}

impl Tally {
    fn add(&mut self, win: bool) {
        self.n += 1;
        if win {
            self.wins += 1;
        }
    }

    fn rate(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.wins as f64 / self.n as f64 * 100.0
        }
    }
}

#[derive(Default)]
struct LearnerInner {
    outcomes: VecDeque<LearnedOutcome>,
    recommendations: Vec<Recommendation>,
    since_analysis: usize,
    last_analysis: Option<Timestamp>,
}

pub struct AdaptiveLearner {
    config: LearnerConfig,
    clock: Arc<dyn Clock>,
    inner: RwLock<LearnerInner>,
}

impl AdaptiveLearner {
    pub fn new(config: LearnerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: RwLock::new(LearnerInner::default()),
        }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    // ========================================================================
    // Recording & analysis
    // ========================================================================

    /// Remember a closed trade; returns whether an analysis is now due
    pub async fn record_trade(&self, trade: &TradeResult) -> bool {
        let mut inner = self.inner.write().await;
        inner.outcomes.push_back(LearnedOutcome::from(trade));
        while inner.outcomes.len() > self.config.max_outcomes {
            inner.outcomes.pop_front();
        }
        inner.since_analysis += 1;
        self.analysis_due(&inner)
    }

    fn analysis_due(&self, inner: &LearnerInner) -> bool {
        if inner.since_analysis >= self.config.trades_per_analysis {
            return true;
        }
        let interval_elapsed = match inner.last_analysis {
            Some(at) => self.clock.now() - at >= self.config.analysis_interval,
            None => true,
        };
        interval_elapsed && inner.since_analysis >= self.config.min_trades_for_interval
    }

    pub async fn should_analyze(&self) -> bool {
        self.analysis_due(&*self.inner.read().await)
    }

    /// Run the rules over current outcomes; returns the new recommendations
    pub async fn analyze(&self, sink: &dyn ParameterSink) -> Vec<Recommendation> {
        let now = self.clock.now();
        let (stats, mut taken) = {
            let mut inner = self.inner.write().await;
            inner.since_analysis = 0;
            inner.last_analysis = Some(now);
            if inner.outcomes.len() < self.config.min_total_outcomes {
                return Vec::new();
            }
            let taken: HashSet<(TradingMode, ModeParameter)> = inner
                .recommendations
                .iter()
                .filter(|r| r.status == RecommendationStatus::Pending)
                .map(|r| (r.mode, r.parameter))
                .collect();
            (compute_stats(inner.outcomes.iter()), taken)
        };

        let mut fresh = Vec::new();
        for (mode, stats) in &stats {
            if stats.total < self.config.min_mode_outcomes {
                continue;
            }
            for candidate in self.candidates(*mode, stats, sink).await {
                if !taken.insert((candidate.mode, candidate.parameter)) {
                    continue;
                }
                if candidate.confidence < self.config.min_statistical_confidence {
                    continue;
                }
                fresh.push(candidate);
            }
        }

        if !fresh.is_empty() {
            info!(
                "[ADAPTIVE] {} new recommendation(s) from {} outcome(s)",
                fresh.len(),
                stats.values().map(|s| s.total).sum::<usize>()
            );
            self.inner
                .write()
                .await
                .recommendations
                .extend(fresh.iter().cloned());
        }
        fresh
    }

    async fn candidates(
        &self,
        mode: TradingMode,
        stats: &ModeStats,
        sink: &dyn ParameterSink,
    ) -> Vec<Recommendation> {
        let min_samples = self.config.min_rule_samples;
        let mut out = Vec::new();

        if stats.disagreement_trades >= min_samples && stats.disagreement_win_rate < 40.0 {
            let current = sink
                .current_value(mode, ModeParameter::BlockOnDisagreement)
                .await;
            if current < 0.5 {
                out.push(self.recommend(
                    mode,
                    ModeParameter::BlockOnDisagreement,
                    current,
                    1.0,
                    stats.disagreement_trades,
                    format!(
                        "disagreement trades win {:.1}% over {} trades (below 40%)",
                        stats.disagreement_win_rate, stats.disagreement_trades
                    ),
                ));
            }
        }

        if stats.llm_led_trades >= min_samples {
            let current = sink.current_value(mode, ModeParameter::LlmWeight).await;
            let rate = stats.llm_led_win_rate;
            let suggested = if rate < 45.0 && current > 0.1 {
                Some(round2((current - 0.05).max(0.1)))
            } else if rate > 60.0 && current < 0.5 {
                Some(round2((current + 0.05).min(0.5)))
            } else {
                None
            };
            if let Some(suggested) = suggested.filter(|s| (s - current).abs() > 1e-9) {
                out.push(self.recommend(
                    mode,
                    ModeParameter::LlmWeight,
                    current,
                    suggested,
                    stats.llm_led_trades,
                    format!(
                        "LLM-led trades win {:.1}% over {} trades",
                        rate, stats.llm_led_trades
                    ),
                ));
            }
        }

        if stats.low_confidence_trades >= min_samples && stats.low_confidence_win_rate < 50.0 {
            let current = sink.current_value(mode, ModeParameter::MinConfidence).await;
            let suggested = (current + 10.0).min(75.0);
            if suggested > current {
                out.push(self.recommend(
                    mode,
                    ModeParameter::MinConfidence,
                    current,
                    suggested,
                    stats.low_confidence_trades,
                    format!(
                        "trades at 50-65 confidence win {:.1}% over {} trades",
                        stats.low_confidence_win_rate, stats.low_confidence_trades
                    ),
                ));
            }
        }
        out
    }

    fn recommend(
        &self,
        mode: TradingMode,
        parameter: ModeParameter,
        current_value: f64,
        suggested_value: f64,
        sample_size: usize,
        reasoning: String,
    ) -> Recommendation {
        let n = sample_size as f64;
        Recommendation {
            id: format!("rec_{}", Uuid::new_v4().simple()),
            mode,
            parameter,
            current_value,
            suggested_value,
            confidence: n / (n + self.config.confidence_prior),
            sample_size,
            reasoning,
            status: RecommendationStatus::Pending,
            created_at: self.clock.now(),
            resolved_at: None,
        }
    }

    // ========================================================================
    // Recommendation lifecycle
    // ========================================================================

    pub async fn recommendations(&self) -> Vec<Recommendation> {
        self.inner.read().await.recommendations.clone()
    }

    pub async fn pending_recommendations(&self) -> Vec<Recommendation> {
        self.inner
            .read()
            .await
            .recommendations
            .iter()
            .filter(|r| r.status == RecommendationStatus::Pending)
            .cloned()
            .collect()
    }

    /// Push the suggested value into the live config and mark it applied.
    ///
    /// The learner lock is held across the write so a recommendation can
    /// only be applied once.
    pub async fn apply(&self, id: &str, sink: &dyn ParameterSink) -> Result<Recommendation> {
        let mut inner = self.inner.write().await;
        let rec = pending_mut(&mut inner.recommendations, id)?;
        sink.apply_parameter(rec.mode, rec.parameter, rec.suggested_value)
            .await?;
        rec.status = RecommendationStatus::Applied;
        rec.resolved_at = Some(self.clock.now());
        info!(
            "[ADAPTIVE] Applied {} {}: {} -> {}",
            rec.mode, rec.parameter, rec.current_value, rec.suggested_value
        );
        let resolved = rec.clone();
        trim_resolved(&mut inner.recommendations, self.config.max_resolved_recommendations);
        Ok(resolved)
    }

    pub async fn dismiss(&self, id: &str) -> Result<Recommendation> {
        let mut inner = self.inner.write().await;
        let rec = pending_mut(&mut inner.recommendations, id)?;
        rec.status = RecommendationStatus::Dismissed;
        rec.resolved_at = Some(self.clock.now());
        let resolved = rec.clone();
        trim_resolved(&mut inner.recommendations, self.config.max_resolved_recommendations);
        Ok(resolved)
    }

    /// Apply every pending recommendation, continuing past failures
    pub async fn apply_all(&self, sink: &dyn ParameterSink) -> ApplyAllReport {
        let ids: Vec<String> = self
            .pending_recommendations()
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut report = ApplyAllReport::default();
        for id in ids {
            match self.apply(&id, sink).await {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    warn!("[ADAPTIVE] Could not apply {}: {}", id, e);
                    report.errors.push(ItemError::new(id, e));
                }
            }
        }
        report
    }

    // ========================================================================
    // Reporting & maintenance
    // ========================================================================

    pub async fn stats_by_mode(&self) -> BTreeMap<TradingMode, ModeStats> {
        compute_stats(self.inner.read().await.outcomes.iter())
    }

    pub async fn analyze_agreement_patterns(&self) -> AgreementPatterns {
        let inner = self.inner.read().await;
        let mut both_long = Tally::default();
        let mut both_short = Tally::default();
        let mut technical_only = Tally::default();
        let mut llm_only = Tally::default();
        let mut disagreement = Tally::default();

        for outcome in &inner.outcomes {
            let Some(ctx) = &outcome.decision else {
                continue;
            };
            let win = outcome.is_win();
            let tech = ctx.technical_direction;
            let llm = ctx.llm_direction.unwrap_or(Direction::Neutral);

            match (tech, llm) {
                (Direction::Long, Direction::Long) => both_long.add(win),
                (Direction::Short, Direction::Short) => both_short.add(win),
                _ => {}
            }
            if !tech.is_neutral() && llm != tech {
                technical_only.add(win);
            }
            if !llm.is_neutral() && tech != llm {
                llm_only.add(win);
            }
            if !ctx.agreement {
                disagreement.add(win);
            }
        }

        AgreementPatterns {
            both_long: both_long.n,
            both_long_win_rate: both_long.rate(),
            both_short: both_short.n,
            both_short_win_rate: both_short.rate(),
            technical_only: technical_only.n,
            technical_only_win_rate: technical_only.rate(),
            llm_only: llm_only.n,
            llm_only_win_rate: llm_only.rate(),
            disagreement: disagreement.n,
            disagreement_win_rate: disagreement.rate(),
        }
    }

    pub async fn outcome_count(&self) -> usize {
        self.inner.read().await.outcomes.len()
    }

    /// Drop outcomes closed more than `age` ago; returns how many went
    pub async fn clear_older_than(&self, age: Duration) -> usize {
        let cutoff = self.clock.now() - age;
        let mut inner = self.inner.write().await;
        let before = inner.outcomes.len();
        inner.outcomes.retain(|o| o.closed_at >= cutoff);
        before - inner.outcomes.len()
    }

    pub async fn export_outcomes(&self) -> Result<String> {
        let inner = self.inner.read().await;
        Ok(serde_json::to_string(&inner.outcomes)?)
    }

    /// Merge exported outcomes, skipping trades already known
    pub async fn import_outcomes(&self, json: &str) -> Result<usize> {
        let incoming: Vec<LearnedOutcome> = serde_json::from_str(json)?;
        let mut inner = self.inner.write().await;
        let known: HashSet<Uuid> = inner.outcomes.iter().map(|o| o.trade_id).collect();

        let mut added = 0;
        for outcome in incoming {
            if known.contains(&outcome.trade_id) {
                continue;
            }
            inner.outcomes.push_back(outcome);
            added += 1;
        }
        inner
            .outcomes
            .make_contiguous()
            .sort_by_key(|o| o.closed_at);
        while inner.outcomes.len() > self.config.max_outcomes {
            inner.outcomes.pop_front();
        }
        Ok(added)
    }
}

fn pending_mut<'a>(recs: &'a mut [Recommendation], id: &str) -> Result<&'a mut Recommendation> {
    let rec = recs
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| Error::UnknownRecommendation(id.to_string()))?;
    if rec.status != RecommendationStatus::Pending {
        return Err(Error::NotPending {
            id: id.to_string(),
            status: rec.status.as_str(),
        });
    }
    Ok(rec)
}

/// Drop the earliest-resolved entries beyond `limit`; pending ones stay
fn trim_resolved(recs: &mut Vec<Recommendation>, limit: usize) {
    let mut resolved = recs
        .iter()
        .filter(|r| r.status != RecommendationStatus::Pending)
        .count();
    while resolved > limit {
        let oldest = recs
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status != RecommendationStatus::Pending)
            .min_by_key(|(_, r)| r.resolved_at)
            .map(|(idx, _)| idx);
        let Some(idx) = oldest else {
            break;
        };
        recs.remove(idx);
        resolved -= 1;
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn compute_stats<'a>(
    outcomes: impl Iterator<Item = &'a LearnedOutcome>,
) -> BTreeMap<TradingMode, ModeStats> {
    #[derive(Default)]
    struct Acc {
        stats: ModeStats,
        agreement: Tally,
        disagreement: Tally,
        llm_led: Tally,
        low: Tally,
        medium: Tally,
        high: Tally,
    }

    let mut by_mode: BTreeMap<TradingMode, Acc> = BTreeMap::new();
    for outcome in outcomes {
        let acc = by_mode.entry(outcome.mode).or_default();
        let win = outcome.is_win();
        acc.stats.total += 1;
        acc.stats.total_pnl_percent += outcome.pnl_percent;
        match outcome.outcome {
            TradeOutcome::Win => acc.stats.wins += 1,
            TradeOutcome::Loss => acc.stats.losses += 1,
            TradeOutcome::Breakeven => acc.stats.breakeven += 1,
        }

        let Some(ctx) = &outcome.decision else {
            continue;
        };
        if ctx.agreement {
            acc.agreement.add(win);
        } else {
            acc.disagreement.add(win);
        }
        if outcome.is_llm_led() {
            acc.llm_led.add(win);
        }
        match ctx.final_confidence {
            c if (50.0..65.0).contains(&c) => acc.low.add(win),
            c if (65.0..80.0).contains(&c) => acc.medium.add(win),
            c if c >= 80.0 => acc.high.add(win),
            _ => {}
        }
    }

    by_mode
        .into_iter()
        .map(|(mode, acc)| {
            let mut stats = acc.stats;
            stats.win_rate = Tally {
                n: stats.total,
                wins: stats.wins,
            }
            .rate();
            stats.agreement_trades = acc.agreement.n;
            stats.agreement_win_rate = acc.agreement.rate();
            stats.disagreement_trades = acc.disagreement.n;
            stats.disagreement_win_rate = acc.disagreement.rate();
            stats.llm_led_trades = acc.llm_led.n;
            stats.llm_led_win_rate = acc.llm_led.rate();
            stats.low_confidence_trades = acc.low.n;
            stats.low_confidence_win_rate = acc.low.rate();
            stats.medium_confidence_trades = acc.medium.n;
            stats.medium_confidence_win_rate = acc.medium.rate();
            stats.high_confidence_trades = acc.high.n;
            stats.high_confidence_win_rate = acc.high.rate();
            (mode, stats)
        })
        .collect()
}
