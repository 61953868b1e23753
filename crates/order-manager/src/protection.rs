//! Protection Supervisor
//!
//! Keeps every ledger entry covered by a stop-loss and a take-profit ladder
//! on the exchange.
//!
//! ```text
//!   audit() per position:
//!     EMERGENCY    ─► skipped, needs an explicit close
//!     PROTECTED    ─► orders still on exchange? ─ no ─► UNPROTECTED ─┐
//!     UNPROTECTED  ─► HEALING ─► re-place SL/TP ─ ok ─► PROTECTED    │
//!     HEALING          │              └─ fail × max ─► EMERGENCY     │
//!                      └──────────────────────────────────────────────┘
//! ```
//!
//! Placement and healing of one symbol are serialised by a per-symbol lock.
//! Callers opening a position hold it from the entry order until `protect`
//! returns; the audit skips symbols whose lock is taken.

use crate::error::{Error, Result};
use crate::jobs::{Job, JobProgress, JobQueue};
use crate::ledger::PositionLedger;
use crate::sltp::SlTpCalculator;
use crate::venue::{ExecutionVenue, Placement};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{
    Position, PositionSide, Price, ProtectionState, Quantity, Symbol, TradingMode,
};
use sentinel_ports::{Clock, ItemError, MarketScanner, OpenOrder, OrderKind, OrderRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct ProtectionConfig {
    /// Failed heals before a position is declared EMERGENCY
    pub max_heal_attempts: u32,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_heal_attempts: 3,
        }
    }
}

/// Protection view of one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionProtection {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub mode: TradingMode,
    pub state: ProtectionState,
    pub stop_loss: Option<Price>,
    pub take_profit_levels: usize,
    pub protective_orders: usize,
    pub heal_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectionSummary {
    pub total: usize,
    pub protected: usize,
    pub unprotected: usize,
    pub healing: usize,
    pub emergency: usize,
    /// Share of positions that are PROTECTED; 100 when there are none
    pub health_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectionStatus {
    pub positions: Vec<PositionProtection>,
    pub summary: ProtectionSummary,
}

/// Result of one audit pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub checked: usize,
    pub verified: usize,
    /// PROTECTED positions found with orders missing
    pub lost_protection: usize,
    pub healed: usize,
    pub still_healing: usize,
    pub new_emergencies: usize,
    pub skipped_emergencies: usize,
    /// Positions whose placement was in flight and were left alone
    pub in_flight: usize,
    pub errors: Vec<ItemError>,
}

/// Result of an SL/TP recomputation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalcReport {
    pub candidates: usize,
    pub updated: usize,
    pub reprotected: usize,
    pub errors: Vec<ItemError>,
}

pub struct ProtectionSupervisor {
    ledger: Arc<PositionLedger>,
    venue: Arc<ExecutionVenue>,
    scanner: Option<Arc<dyn MarketScanner>>,
    calculator: SlTpCalculator,
    clock: Arc<dyn Clock>,
    config: ProtectionConfig,
    heal_attempts: Mutex<HashMap<Symbol, u32>>,
    symbol_locks: Mutex<HashMap<Symbol, Arc<Mutex<()>>>>,
}

impl ProtectionSupervisor {
    pub fn new(
        ledger: Arc<PositionLedger>,
        scanner: Option<Arc<dyn MarketScanner>>,
        calculator: SlTpCalculator,
        clock: Arc<dyn Clock>,
        config: ProtectionConfig,
    ) -> Self {
        let venue = ledger.venue().clone();
        Self {
            ledger,
            venue,
            scanner,
            calculator,
            clock,
            config,
            heal_attempts: Mutex::new(HashMap::new()),
            symbol_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    async fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.symbol_locks
            .lock()
            .await
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }

    /// Exclusive right to place or replace orders for `symbol`. Hold it
    /// across an entry and the `protect` call that follows.
    pub async fn lock_symbol(&self, symbol: &str) -> OwnedMutexGuard<()> {
        self.symbol_lock(symbol).await.lock_owned().await
    }

    async fn try_lock_symbol(&self, symbol: &str) -> Option<OwnedMutexGuard<()>> {
        self.symbol_lock(symbol).await.try_lock_owned().ok()
    }

    // ========================================================================
    // Placement
    // ========================================================================

    /// Place SL and the TP ladder for a tracked position and mark it
    /// PROTECTED. If any order is rejected the ones already placed are
    /// cancelled and the position keeps its current state.
    ///
    /// The caller holds [`lock_symbol`](Self::lock_symbol) for `symbol`.
    pub async fn protect(&self, placement: &Placement<'_>, symbol: &str) -> Result<Vec<String>> {
        let position = self
            .ledger
            .get(symbol)
            .await
            .ok_or_else(|| Error::UnknownPosition(symbol.to_string()))?;
        let stop = position
            .stop_loss
            .ok_or_else(|| Error::Invalid(format!("{} has no stop-loss level", symbol)))?;

        let mut placed: Vec<String> = Vec::new();
        let mut outcome = place_one(
            placement,
            &position,
            OrderKind::StopMarket,
            position.quantity,
            stop,
        )
        .await
        .map(|id| placed.push(id));

        if outcome.is_ok() {
            for (qty, price) in ladder_slices(&position) {
                outcome = place_one(placement, &position, OrderKind::TakeProfitMarket, qty, price)
                    .await
                    .map(|id| placed.push(id));
                if outcome.is_err() {
                    break;
                }
            }
        }

        if let Err(e) = outcome {
            for order_id in &placed {
                if let Err(cancel_err) = placement.cancel_order(symbol, order_id).await {
                    warn!(
                        "[PROTECT] Could not roll back {} on {}: {}",
                        order_id, symbol, cancel_err
                    );
                }
            }
            return Err(e);
        }

        self.ledger
            .set_protective_orders(symbol, placed.clone())
            .await?;
        if position.protection != ProtectionState::Protected {
            self.ledger
                .transition_protection(symbol, ProtectionState::Protected)
                .await?;
        }
        self.heal_attempts.lock().await.remove(symbol);

        info!(
            "[PROTECT] {} {} protected: SL {} + {} TP level(s)",
            self.ledger.user_id(),
            symbol,
            stop,
            placed.len() - 1
        );
        Ok(placed)
    }

    /// Cancel the position's current protective orders and place fresh ones.
    /// The caller holds the symbol lock.
    async fn replace_protection(&self, symbol: &str) -> Result<()> {
        let position = self
            .ledger
            .get(symbol)
            .await
            .ok_or_else(|| Error::UnknownPosition(symbol.to_string()))?;

        let placement = self.venue.placement().await;
        for order_id in &position.protective_order_ids {
            if let Err(e) = placement.cancel_order(symbol, order_id).await {
                debug!("[PROTECT] Cancel {} on {}: {}", order_id, symbol, e);
            }
        }
        self.ledger.set_protective_orders(symbol, Vec::new()).await?;

        match self.protect(&placement, symbol).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Old orders are gone; the position is no longer covered
                if position.protection == ProtectionState::Protected {
                    self.ledger
                        .transition_protection(symbol, ProtectionState::Unprotected)
                        .await?;
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Audit & healing
    // ========================================================================

    /// Verify every position against the exchange and heal what is naked
    pub async fn audit(&self) -> AuditReport {
        let mut report = AuditReport::default();

        for listed in self.ledger.positions().await {
            report.checked += 1;
            let symbol = listed.symbol.clone();

            let Some(_guard) = self.try_lock_symbol(&symbol).await else {
                debug!("[PROTECT] {} placement in flight, audit skips it", symbol);
                report.in_flight += 1;
                continue;
            };
            // Re-read under the lock; a placement may have finished meanwhile
            let Some(position) = self.ledger.get(&symbol).await else {
                continue;
            };

            match position.protection {
                ProtectionState::Emergency => {
                    report.skipped_emergencies += 1;
                    continue;
                }
                ProtectionState::Protected => {
                    match self.venue.get_open_orders(&symbol).await {
                        Ok(orders) if is_covered(&position, &orders) => {
                            report.verified += 1;
                            continue;
                        }
                        Ok(_) => {
                            warn!(
                                "[PROTECT] {} {} lost SL/TP on exchange",
                                self.ledger.user_id(),
                                symbol
                            );
                            report.lost_protection += 1;
                            if let Err(e) = self
                                .ledger
                                .transition_protection(&symbol, ProtectionState::Unprotected)
                                .await
                            {
                                report.errors.push(ItemError::new(&symbol, e));
                                continue;
                            }
                        }
                        Err(e) => {
                            report.errors.push(ItemError::new(&symbol, e));
                            continue;
                        }
                    }
                }
                ProtectionState::Unprotected | ProtectionState::Healing => {}
            }

            match self.heal(&symbol).await {
                Ok(ProtectionState::Protected) => report.healed += 1,
                Ok(ProtectionState::Emergency) => report.new_emergencies += 1,
                Ok(_) => report.still_healing += 1,
                Err(e) => report.errors.push(ItemError::new(&symbol, e)),
            }
        }

        if report.lost_protection + report.healed + report.new_emergencies > 0 {
            info!(
                "[PROTECT] {} audit: {} checked, {} healed, {} emergency",
                self.ledger.user_id(),
                report.checked,
                report.healed,
                report.new_emergencies
            );
        }
        report
    }

    /// One healing attempt under the symbol lock; returns the resulting state
    async fn heal(&self, symbol: &str) -> Result<ProtectionState> {
        self.ledger
            .transition_protection(symbol, ProtectionState::Healing)
            .await?;

        let attempt = {
            let mut attempts = self.heal_attempts.lock().await;
            let counter = attempts.entry(symbol.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        match self.replace_protection(symbol).await {
            Ok(()) => {
                info!(
                    "[PROTECT] {} {} healed on attempt {}",
                    self.ledger.user_id(),
                    symbol,
                    attempt
                );
                Ok(ProtectionState::Protected)
            }
            Err(e) if attempt >= self.config.max_heal_attempts => {
                self.ledger
                    .transition_protection(symbol, ProtectionState::Emergency)
                    .await?;
                error!(
                    "[PROTECT] {} {} EMERGENCY after {} failed heal(s): {}",
                    self.ledger.user_id(),
                    symbol,
                    attempt,
                    e
                );
                Ok(ProtectionState::Emergency)
            }
            Err(e) => {
                warn!(
                    "[PROTECT] {} {} heal attempt {}/{} failed: {}",
                    self.ledger.user_id(),
                    symbol,
                    attempt,
                    self.config.max_heal_attempts,
                    e
                );
                Ok(ProtectionState::Healing)
            }
        }
    }

    pub async fn protection_status(&self) -> ProtectionStatus {
        let attempts = self.heal_attempts.lock().await.clone();
        let positions: Vec<PositionProtection> = self
            .ledger
            .positions()
            .await
            .into_iter()
            .map(|p| PositionProtection {
                heal_attempts: attempts.get(&p.symbol).copied().unwrap_or(0),
                symbol: p.symbol,
                side: p.side,
                mode: p.mode,
                state: p.protection,
                stop_loss: p.stop_loss,
                take_profit_levels: p.take_profits.len(),
                protective_orders: p.protective_order_ids.len(),
            })
            .collect();

        let mut summary = ProtectionSummary {
            total: positions.len(),
            ..Default::default()
        };
        for p in &positions {
            match p.state {
                ProtectionState::Protected => summary.protected += 1,
                ProtectionState::Unprotected => summary.unprotected += 1,
                ProtectionState::Healing => summary.healing += 1,
                ProtectionState::Emergency => summary.emergency += 1,
            }
        }
        summary.health_pct = if summary.total == 0 {
            100.0
        } else {
            summary.protected as f64 / summary.total as f64 * 100.0
        };

        ProtectionStatus { positions, summary }
    }

    // ========================================================================
    // Adaptive SL/TP
    // ========================================================================

    /// Recompute levels for every naked or out-of-date position and
    /// re-place its protection.
    pub async fn recalculate_adaptive_sltp(&self, progress: Option<&JobProgress>) -> RecalcReport {
        let now = self.clock.now();
        let stale_after = self.calculator.config().stale_after;
        let candidates: Vec<Position> = self
            .ledger
            .positions()
            .await
            .into_iter()
            .filter(|p| p.protection != ProtectionState::Emergency)
            .filter(|p| {
                p.protection.is_naked()
                    || p.levels_updated_at.is_none_or(|at| now - at > stale_after)
            })
            .collect();

        let mut report = RecalcReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        if let Some(progress) = progress {
            progress.set_total(candidates.len()).await;
        }

        for position in candidates {
            if let Some(progress) = progress {
                progress.begin_item(&position.symbol).await;
            }
            let outcome = self.recalculate_one(&position).await;
            if let Some(progress) = progress {
                progress.finish_item(outcome.is_ok()).await;
            }
            match outcome {
                Ok(reprotected) => {
                    report.updated += 1;
                    if reprotected {
                        report.reprotected += 1;
                    }
                }
                Err(e) => report.errors.push(ItemError::new(&position.symbol, e)),
            }
        }

        info!(
            "[PROTECT] {} SL/TP recalculated: {}/{} updated, {} error(s)",
            self.ledger.user_id(),
            report.updated,
            report.candidates,
            report.errors.len()
        );
        report
    }

    /// Returns whether protection was re-placed
    async fn recalculate_one(&self, position: &Position) -> Result<bool> {
        let atr = match &self.scanner {
            Some(scanner) => match scanner.scan(&position.symbol, position.mode).await {
                Ok(scan) => scan.atr_percent,
                Err(e) => {
                    debug!("[PROTECT] No scan for {}: {}", position.symbol, e);
                    Decimal::ZERO
                }
            },
            None => Decimal::ZERO,
        };

        let mark = self.venue.get_mark_price(&position.symbol).await?;
        let levels = self
            .calculator
            .calculate(position.mode, position.side, mark, atr, None);
        self.ledger
            .update_levels(&position.symbol, levels.sl_percent, levels.tp_percent)
            .await?;
        debug!("[PROTECT] {} {}", position.symbol, levels.reasoning);

        // Healing positions are left to the audit loop
        if position.protection == ProtectionState::Healing {
            return Ok(false);
        }
        let _guard = self.lock_symbol(&position.symbol).await;
        if !self.ledger.contains(&position.symbol).await {
            return Ok(false);
        }
        self.replace_protection(&position.symbol).await?;
        Ok(true)
    }

    /// Queue the recomputation as a background job; returns the job id
    pub async fn recalculate_adaptive_sltp_async(
        self: &Arc<Self>,
        queue: &JobQueue,
    ) -> Result<String> {
        queue
            .submit(Box::new(RecalcJob {
                supervisor: self.clone(),
            }))
            .await
    }

    /// Forget heal bookkeeping for a closed position
    pub async fn forget(&self, symbol: &str) {
        self.heal_attempts.lock().await.remove(symbol);
        let mut locks = self.symbol_locks.lock().await;
        if locks.get(symbol).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(symbol);
        }
    }
}

struct RecalcJob {
    supervisor: Arc<ProtectionSupervisor>,
}

#[async_trait]
impl Job for RecalcJob {
    fn kind(&self) -> &str {
        "sltp_recalc"
    }

    async fn run(self: Box<Self>, progress: JobProgress) -> std::result::Result<Value, String> {
        let report = self
            .supervisor
            .recalculate_adaptive_sltp(Some(&progress))
            .await;
        serde_json::to_value(&report).map_err(|e| e.to_string())
    }
}

async fn place_one(
    placement: &Placement<'_>,
    position: &Position,
    kind: OrderKind,
    quantity: Quantity,
    trigger: Price,
) -> Result<String> {
    let request = OrderRequest::protective(&position.symbol, position.side, kind, quantity, trigger);
    let ack = placement.place_order(request).await?;
    Ok(ack.order_id)
}

/// `(quantity, trigger)` per TP stage; the last stage takes the remainder
fn ladder_slices(position: &Position) -> Vec<(Quantity, Price)> {
    let mut slices = Vec::with_capacity(position.take_profits.len());
    let mut allocated = Decimal::ZERO;
    let last = position.take_profits.len().saturating_sub(1);

    for (idx, level) in position.take_profits.iter().enumerate() {
        let qty = if idx == last {
            position.quantity - allocated
        } else {
            (position.quantity * level.close_percent / dec!(100)).round_dp(6)
        };
        if qty <= Decimal::ZERO {
            continue;
        }
        allocated += qty;
        slices.push((qty, level.price));
    }
    slices
}

/// Exchange still holds a stop and at least one take-profit for the position
fn is_covered(position: &Position, orders: &[OpenOrder]) -> bool {
    let exit_side = position.side.exit_side();
    let relevant = orders
        .iter()
        .filter(|o| o.reduce_only && o.side == exit_side);
    let mut has_stop = false;
    let mut has_tp = false;
    for order in relevant {
        match order.kind {
            OrderKind::StopMarket => has_stop = true,
            OrderKind::TakeProfitMarket => has_tp = true,
            OrderKind::Market => {}
        }
    }
    has_stop && has_tp
}
