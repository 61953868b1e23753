//! Tenant Engine
//!
//! One user's complete engine bundle: venue, ledger, protection, breaker,
//! decisions, live mode config, signal log, learner and job queue. The
//! orchestrator owns the lifecycle; everything here is the tenant's state
//! and the operations a transport layer may invoke on it.

use chrono::NaiveDate;
use log::{info, warn};
use rust_decimal::Decimal;
use sentinel_core::{
    CircuitBreakerPatch, CloseReason, ModeConfig, ModeConfigPatch, Position, Symbol, Timestamp,
    TradeOutcome, TradeResult, TradingMode, UserId, UserSettings,
};
use sentinel_order_manager::{
    AuditReport, CloseAllReport, DynamicSlTpConfig, ExecutionVenue, JobQueue, JobQueueConfig,
    JobRecord, OpenRequest, PositionLedger, ProtectionConfig, ProtectionStatus,
    ProtectionSupervisor, RecalcReport, SlTpCalculator, SyncReport, VenueConfig,
    resolve_roi_target, target_reached, validate_roi_percent,
};
use sentinel_ports::{
    Clock, EngineError, EngineResult, ExchangeClient, ExchangeClientFactory, ItemError,
    LlmProvider, MarketScanner, SettingsRepository, SignalLogStore, TradeHistoryStore,
};
use sentinel_risk_manager::{BreakerSnapshot, RiskGovernor};
use sentinel_strategy::{
    AdaptiveLearner, ApplyAllReport, Decision, DecisionEngine, LearnerConfig, ModeConfigStore,
    ModeStats, Recommendation, SignalLog,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

// ============================================================================
// Construction inputs
// ============================================================================

/// Shared collaborators handed to every tenant
#[derive(Clone)]
pub struct Collaborators {
    pub factory: Arc<dyn ExchangeClientFactory>,
    pub scanner: Arc<dyn MarketScanner>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub settings: Arc<dyn SettingsRepository>,
    pub history: Arc<dyn TradeHistoryStore>,
    pub signals: Option<Arc<dyn SignalLogStore>>,
    pub clock: Arc<dyn Clock>,
}

/// Component configs for one engine bundle
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub venue: VenueConfig,
    pub protection: ProtectionConfig,
    pub sltp: DynamicSlTpConfig,
    pub jobs: JobQueueConfig,
    pub learner: LearnerConfig,
    pub signal_log_capacity: usize,
    /// Period of the reconcile / ROI / audit loop
    pub health_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            venue: VenueConfig::default(),
            protection: ProtectionConfig::default(),
            sltp: DynamicSlTpConfig::default(),
            jobs: JobQueueConfig::default(),
            learner: LearnerConfig::default(),
            signal_log_capacity: sentinel_strategy::DEFAULT_SIGNAL_LOG_CAPACITY,
            health_interval: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Trades opened and PnL realized by one mode today (UTC)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeDaily {
    pub trades: u32,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSummary {
    pub mode: TradingMode,
    pub enabled: bool,
    pub positions: usize,
    pub max_positions: usize,
    pub scan_interval_secs: u64,
    pub daily_trades: u32,
    pub daily_pnl: Decimal,
}

/// Point-in-time view of a tenant's trading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub dry_run: bool,
    pub exchange: String,
    pub active_positions: usize,
    pub total_trades: u64,
    /// Percent of closed trades that were wins
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub daily_trades: u32,
    pub daily_pnl: Decimal,
    /// `tripped`, `active` or `disabled`
    pub circuit_breaker: String,
    pub breaker: BreakerSnapshot,
    pub modes: Vec<ModeSummary>,
}

/// One pass of the health loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Positions that closed on the exchange (SL/TP fills)
    pub reconciled: usize,
    /// Positions closed early at their ROI target
    pub roi_closed: usize,
    pub audit: AuditReport,
    pub errors: Vec<ItemError>,
}

#[derive(Default)]
struct TradingStats {
    total_trades: u64,
    wins: u64,
    total_pnl: Decimal,
    day: Option<NaiveDate>,
    daily: BTreeMap<TradingMode, ModeDaily>,
}

impl TradingStats {
    fn roll(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.daily.clear();
            self.day = Some(today);
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct TenantEngine {
    user_id: UserId,
    created_at: Timestamp,
    dry_run: AtomicBool,
    llm_enabled: AtomicBool,
    symbol_roi: RwLock<BTreeMap<Symbol, Decimal>>,
    health_interval: Duration,

    venue: Arc<ExecutionVenue>,
    ledger: Arc<PositionLedger>,
    supervisor: Arc<ProtectionSupervisor>,
    governor: Arc<RiskGovernor>,
    decisions: Arc<DecisionEngine>,
    modes: Arc<ModeConfigStore>,
    signal_log: Arc<SignalLog>,
    learner: Arc<AdaptiveLearner>,
    jobs: Arc<JobQueue>,

    scanner: Arc<dyn MarketScanner>,
    settings_repo: Arc<dyn SettingsRepository>,
    history: Arc<dyn TradeHistoryStore>,
    clock: Arc<dyn Clock>,
    stats: RwLock<TradingStats>,
}

impl TenantEngine {
    /// Build a bundle around an already created exchange client
    pub fn new(
        user_id: impl Into<UserId>,
        settings: &UserSettings,
        client: Arc<dyn ExchangeClient>,
        deps: &Collaborators,
        config: &EngineConfig,
    ) -> Self {
        let user_id = user_id.into();
        let clock = deps.clock.clone();

        let venue = Arc::new(ExecutionVenue::new(client, config.venue.clone()));
        let ledger = Arc::new(PositionLedger::new(
            user_id.clone(),
            venue.clone(),
            clock.clone(),
        ));
        let supervisor = Arc::new(ProtectionSupervisor::new(
            ledger.clone(),
            Some(deps.scanner.clone()),
            SlTpCalculator::new(config.sltp.clone()),
            clock.clone(),
            config.protection.clone(),
        ));

        info!(
            "[ENGINE] {} engine created ({})",
            user_id,
            if settings.dry_run { "paper" } else { "live" }
        );

        Self {
            created_at: clock.now(),
            dry_run: AtomicBool::new(settings.dry_run),
            llm_enabled: AtomicBool::new(settings.llm.enabled),
            symbol_roi: RwLock::new(settings.symbol_roi.clone()),
            health_interval: config.health_interval,
            venue,
            ledger,
            supervisor,
            governor: Arc::new(RiskGovernor::new(
                settings.circuit_breaker.clone(),
                clock.clone(),
            )),
            decisions: Arc::new(DecisionEngine::new(deps.llm.clone(), clock.clone())),
            modes: Arc::new(ModeConfigStore::from_settings(settings)),
            signal_log: Arc::new(SignalLog::new(
                user_id.clone(),
                config.signal_log_capacity,
                deps.signals.clone(),
            )),
            learner: Arc::new(AdaptiveLearner::new(config.learner.clone(), clock.clone())),
            jobs: Arc::new(JobQueue::new(config.jobs.clone(), clock.clone())),
            scanner: deps.scanner.clone(),
            settings_repo: deps.settings.clone(),
            history: deps.history.clone(),
            user_id,
            clock,
            stats: RwLock::new(TradingStats::default()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.load(Ordering::SeqCst)
    }

    pub fn llm_enabled(&self) -> bool {
        self.llm_enabled.load(Ordering::SeqCst)
    }

    pub fn health_interval(&self) -> Duration {
        self.health_interval
    }

    pub fn venue(&self) -> &Arc<ExecutionVenue> {
        &self.venue
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub fn supervisor(&self) -> &Arc<ProtectionSupervisor> {
        &self.supervisor
    }

    pub fn governor(&self) -> &Arc<RiskGovernor> {
        &self.governor
    }

    pub fn decisions(&self) -> &Arc<DecisionEngine> {
        &self.decisions
    }

    pub fn modes(&self) -> &Arc<ModeConfigStore> {
        &self.modes
    }

    pub fn signal_log(&self) -> &Arc<SignalLog> {
        &self.signal_log
    }

    pub fn learner(&self) -> &Arc<AdaptiveLearner> {
        &self.learner
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }

    pub fn scanner(&self) -> &Arc<dyn MarketScanner> {
        &self.scanner
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // Opening
    // ========================================================================

    /// Mode-local cap that currently blocks `mode`, if any
    pub async fn mode_gate(&self, mode: TradingMode, config: &ModeConfig) -> Option<&'static str> {
        if self.ledger.count_by_mode(mode).await >= config.max_positions {
            return Some("max_positions");
        }
        let daily = self.daily(mode).await;
        if daily.trades >= config.daily_trade_cap {
            return Some("daily_trade_cap");
        }
        if daily.realized_pnl <= -config.daily_loss_cap {
            return Some("daily_loss_cap");
        }
        None
    }

    /// Open and protect a position for an EXECUTE decision.
    ///
    /// Mode caps come first, then the tenant-wide breaker; passing one
    /// never skips the other. Entry and protection run under a single
    /// placement guard, so a client swap waits for both, and under the
    /// symbol's protection lock, so the audit never heals a position whose
    /// first SL/TP ladder is still being placed.
    pub async fn execute(&self, decision: &Decision, config: &ModeConfig) -> EngineResult<Position> {
        let side = decision.action.position_side().ok_or_else(|| {
            EngineError::Validation(format!("{} has no direction to trade", decision.symbol))
        })?;

        if let Some(reason) = self.mode_gate(decision.mode, config).await {
            return Err(EngineError::RiskBlocked(reason.to_string()));
        }
        self.governor.can_trade().await.into_result()?;

        let request = OpenRequest::from_mode(&decision.symbol, side, decision.mode, config)
            .with_decision(decision.context.clone());

        let _protecting = self.supervisor.lock_symbol(&decision.symbol).await;
        let placement = self.venue.placement().await;
        let position = self.ledger.open_position(&placement, request).await?;
        self.count_open(decision.mode).await;

        if let Err(e) = self.supervisor.protect(&placement, &position.symbol).await {
            warn!(
                "[{}:{}] {} opened without protection, audit will heal: {}",
                self.user_id, decision.mode, position.symbol, e
            );
        }
        Ok(position)
    }

    // ========================================================================
    // Closing & outcomes
    // ========================================================================

    /// Feed a closed trade to the breaker, learner, history and stats
    pub async fn record_trade(&self, trade: &TradeResult) {
        let state = self
            .governor
            .record_outcome(trade.pnl_percent, trade.closed_at)
            .await;
        if !state.allows_new_trades() {
            warn!(
                "[{}] circuit breaker {:?} after {} ({}%)",
                self.user_id, state, trade.symbol, trade.pnl_percent.round_dp(2)
            );
        }

        if self.learner.record_trade(trade).await {
            let fresh = self.learner.analyze(self.modes.as_ref()).await;
            if !fresh.is_empty() {
                info!(
                    "[{}] {} parameter recommendation(s) pending",
                    self.user_id,
                    fresh.len()
                );
            }
        }

        if let Err(e) = self.history.append(&self.user_id, trade).await {
            warn!(
                "[{}] trade {} not persisted: {}",
                self.user_id, trade.id, e
            );
        }

        self.supervisor.forget(&trade.symbol).await;

        let mut stats = self.stats.write().await;
        stats.roll(self.clock.now().date_naive());
        stats.total_trades += 1;
        stats.total_pnl += trade.realized_pnl;
        if trade.outcome() == TradeOutcome::Win {
            stats.wins += 1;
        }
        if stats.day == Some(trade.closed_at.date_naive()) {
            stats.daily.entry(trade.mode).or_default().realized_pnl += trade.realized_pnl;
        }
    }

    pub async fn close_position(&self, symbol: &str, reason: CloseReason) -> EngineResult<TradeResult> {
        let trade = {
            let placement = self.venue.placement().await;
            self.ledger.close_position(&placement, symbol, reason).await?
        };
        self.record_trade(&trade).await;
        Ok(trade)
    }

    pub async fn close_all(&self) -> CloseAllReport {
        let report = self.ledger.close_all_positions().await;
        for trade in &report.results {
            self.record_trade(trade).await;
        }
        info!(
            "[{}] close all: {} closed, pnl {}, {} error(s)",
            self.user_id,
            report.closed,
            report.total_pnl.round_dp(4),
            report.errors.len()
        );
        report
    }

    pub async fn force_sync(&self) -> EngineResult<SyncReport> {
        let import_defaults = self.modes.get(TradingMode::Swing).await;
        Ok(self
            .ledger
            .force_sync_with_exchange(&import_defaults)
            .await?)
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Reconcile exchange-side closes, book ROI targets, audit protection
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();

        match self.ledger.reconcile_closed().await {
            Ok(closed) => {
                report.reconciled = closed.len();
                for trade in &closed {
                    self.record_trade(trade).await;
                }
            }
            Err(e) => report.errors.push(ItemError::new("reconcile", e)),
        }

        let symbol_roi = self.symbol_roi.read().await.clone();
        for position in self.ledger.positions().await {
            let mark = match self.venue.get_mark_price(&position.symbol).await {
                Ok(mark) => mark,
                Err(e) => {
                    report.errors.push(ItemError::new(&position.symbol, e));
                    continue;
                }
            };
            let mode_config = self.modes.get(position.mode).await;
            let target = resolve_roi_target(&position, &symbol_roi, &mode_config);
            if !target_reached(&position, mark, &target) {
                continue;
            }
            info!(
                "[{}:{}] {} reached ROI target {}% ({:?})",
                self.user_id, position.mode, position.symbol, target.percent, target.source
            );
            match self.close_position(&position.symbol, CloseReason::RoiTarget).await {
                Ok(_) => report.roi_closed += 1,
                Err(e) => report.errors.push(ItemError::new(&position.symbol, e)),
            }
        }

        report.audit = self.supervisor.audit().await;
        report
    }

    pub async fn protection_status(&self) -> ProtectionStatus {
        self.supervisor.protection_status().await
    }

    pub async fn recalculate_sltp(&self) -> RecalcReport {
        self.supervisor.recalculate_adaptive_sltp(None).await
    }

    /// Queue the recomputation; poll the returned id through [`Self::job`]
    pub async fn recalculate_sltp_async(&self) -> EngineResult<String> {
        Ok(self
            .supervisor
            .recalculate_adaptive_sltp_async(&self.jobs)
            .await?)
    }

    pub async fn job(&self, id: &str) -> Option<JobRecord> {
        self.jobs.get_job(id).await
    }

    pub async fn recent_jobs(&self, limit: usize) -> Vec<JobRecord> {
        self.jobs.recent_jobs(limit).await
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub async fn mode_config(&self, mode: TradingMode) -> ModeConfig {
        self.modes.get(mode).await
    }

    pub async fn set_mode_config(
        &self,
        mode: TradingMode,
        patch: &ModeConfigPatch,
    ) -> EngineResult<ModeConfig> {
        Ok(self.modes.update(mode, patch).await?)
    }

    pub async fn update_breaker(&self, patch: &CircuitBreakerPatch) -> EngineResult<()> {
        self.governor.update_config(patch).await?;
        Ok(())
    }

    pub async fn reset_breaker(&self) {
        self.governor.force_reset().await;
    }

    pub async fn set_breaker_enabled(&self, enabled: bool) {
        self.governor.set_enabled(enabled).await;
    }

    pub fn set_llm_enabled(&self, enabled: bool) {
        self.llm_enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn set_dry_run(&self, dry_run: bool) {
        self.dry_run.store(dry_run, Ordering::SeqCst);
    }

    /// Override the ROI target of a tracked position, and optionally save
    /// it as the symbol's default. `None` clears.
    pub async fn set_custom_roi(
        &self,
        symbol: &str,
        roi_percent: Option<Decimal>,
        save_for_symbol: bool,
    ) -> EngineResult<()> {
        let roi_percent = roi_percent.map(validate_roi_percent).transpose()?;

        let tracked = self.ledger.contains(symbol).await;
        if !tracked && !save_for_symbol {
            return Err(EngineError::Validation(format!(
                "no tracked position for {}",
                symbol
            )));
        }
        if tracked {
            self.ledger.set_custom_roi(symbol, roi_percent).await?;
        }

        if save_for_symbol {
            self.settings_repo
                .set_symbol_roi(&self.user_id, symbol, roi_percent)
                .await?;
            let mut saved = self.symbol_roi.write().await;
            match roi_percent {
                Some(percent) => {
                    saved.insert(symbol.to_string(), percent);
                }
                None => {
                    saved.remove(symbol);
                }
            }
        }
        Ok(())
    }

    pub async fn symbol_roi(&self) -> BTreeMap<Symbol, Decimal> {
        self.symbol_roi.read().await.clone()
    }

    // ========================================================================
    // Learner
    // ========================================================================

    pub async fn recommendations(&self) -> Vec<Recommendation> {
        self.learner.recommendations().await
    }

    pub async fn apply_recommendation(&self, id: &str) -> EngineResult<Recommendation> {
        Ok(self.learner.apply(id, self.modes.as_ref()).await?)
    }

    pub async fn dismiss_recommendation(&self, id: &str) -> EngineResult<Recommendation> {
        Ok(self.learner.dismiss(id).await?)
    }

    pub async fn apply_all_recommendations(&self) -> ApplyAllReport {
        self.learner.apply_all(self.modes.as_ref()).await
    }

    pub async fn learner_stats(&self) -> BTreeMap<TradingMode, ModeStats> {
        self.learner.stats_by_mode().await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn positions(&self) -> Vec<Position> {
        self.ledger.positions().await
    }

    pub async fn trade_history(&self, limit: usize) -> EngineResult<Vec<TradeResult>> {
        Ok(self.history.recent(&self.user_id, limit).await?)
    }

    pub async fn daily(&self, mode: TradingMode) -> ModeDaily {
        let mut stats = self.stats.write().await;
        stats.roll(self.clock.now().date_naive());
        stats.daily.get(&mode).cloned().unwrap_or_default()
    }

    async fn count_open(&self, mode: TradingMode) {
        let mut stats = self.stats.write().await;
        stats.roll(self.clock.now().date_naive());
        stats.daily.entry(mode).or_default().trades += 1;
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let breaker = self.governor.snapshot().await;
        let configs = self.modes.all().await;
        let counts = self.ledger.counts_by_mode().await;

        let mut stats = self.stats.write().await;
        stats.roll(self.clock.now().date_naive());

        let modes = configs
            .iter()
            .map(|(mode, config)| {
                let daily = stats.daily.get(mode).cloned().unwrap_or_default();
                ModeSummary {
                    mode: *mode,
                    enabled: config.enabled,
                    positions: counts.get(mode).copied().unwrap_or(0),
                    max_positions: config.max_positions,
                    scan_interval_secs: config.scan_interval_secs,
                    daily_trades: daily.trades,
                    daily_pnl: daily.realized_pnl,
                }
            })
            .collect::<Vec<_>>();

        let win_rate = if stats.total_trades == 0 {
            0.0
        } else {
            stats.wins as f64 / stats.total_trades as f64 * 100.0
        };

        EngineSnapshot {
            dry_run: self.is_dry_run(),
            exchange: self.venue.client_name().await,
            active_positions: counts.values().sum(),
            total_trades: stats.total_trades,
            win_rate,
            total_pnl: stats.total_pnl,
            daily_trades: modes.iter().map(|m| m.daily_trades).sum(),
            daily_pnl: modes.iter().map(|m| m.daily_pnl).sum(),
            circuit_breaker: breaker.label().to_string(),
            breaker,
            modes,
        }
    }

    /// Stop background job workers; used when the tenant is dropped
    pub async fn shutdown_jobs(&self) {
        self.jobs.shutdown().await;
    }
}
