//! Position Ledger
//!
//! Authoritative in-memory record of the positions the autopilot manages for
//! one tenant. Exchange I/O never runs under the ledger lock: state is read,
//! the exchange is called through the venue, then the result is written back.
//!
//! ```text
//!  open_position ──► set leverage ──► market entry ──► UNPROTECTED entry
//!                                                          │
//!                        ProtectionSupervisor::protect ◄───┘
//!
//!  force_sync ──► exchange positions ──► rebuilt entries (mode/source kept)
//!  reconcile_closed ──► entries gone from exchange ──► TradeResults
//! ```

use crate::error::{Error, Result};
use crate::roi::validate_roi_percent;
use crate::venue::{ExecutionVenue, Placement};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{
    CloseReason, DecisionContext, ModeConfig, Position, PositionSide, ProtectionState, SourceTag,
    Symbol, TradeResult, TradingMode, TrailingStop, UserId,
};
use sentinel_ports::{Clock, ExchangePosition, ItemError, OpenOrder, OrderKind, OrderRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Stop distance given to positions imported from the exchange
const IMPORTED_SL_PERCENT: Decimal = dec!(2);

/// Everything needed to open a position
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub mode: TradingMode,
    pub leverage: u32,
    /// Notional size in USD
    pub notional_usd: Decimal,
    pub sl_percent: Decimal,
    pub tp_percent: Decimal,
    pub trailing: TrailingStop,
    pub source: SourceTag,
    pub decision: Option<DecisionContext>,
}

impl OpenRequest {
    /// Request sized and levelled from a mode's config
    pub fn from_mode(
        symbol: impl Into<Symbol>,
        side: PositionSide,
        mode: TradingMode,
        config: &ModeConfig,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            mode,
            leverage: config.leverage,
            notional_usd: config.max_usd_per_position,
            sl_percent: config.sl_percent,
            tp_percent: config.tp_percent,
            trailing: trailing_from(config),
            source: SourceTag::Ai,
            decision: None,
        }
    }

    pub fn with_decision(mut self, decision: DecisionContext) -> Self {
        self.decision = Some(decision);
        self
    }
}

fn trailing_from(config: &ModeConfig) -> TrailingStop {
    TrailingStop {
        enabled: config.trailing.enabled,
        percent: config.trailing.percent,
        activation_percent: config.trailing.activation_percent,
    }
}

/// Outcome of [`PositionLedger::force_sync_with_exchange`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub reconciled: usize,
    pub errors: Vec<ItemError>,
    /// Stopped early after a per-symbol query failed
    pub aborted: bool,
}

/// Outcome of [`PositionLedger::close_all_positions`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseAllReport {
    pub closed: usize,
    pub total_pnl: Decimal,
    pub errors: Vec<ItemError>,
    pub results: Vec<TradeResult>,
}

#[derive(Default)]
struct LedgerInner {
    positions: HashMap<Symbol, Position>,
    /// Symbols with an entry order in flight
    opening: HashSet<Symbol>,
}

pub struct PositionLedger {
    user_id: UserId,
    venue: Arc<ExecutionVenue>,
    clock: Arc<dyn Clock>,
    inner: RwLock<LedgerInner>,
}

impl PositionLedger {
    pub fn new(user_id: impl Into<UserId>, venue: Arc<ExecutionVenue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            user_id: user_id.into(),
            venue,
            clock,
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn venue(&self) -> &Arc<ExecutionVenue> {
        &self.venue
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn positions(&self) -> Vec<Position> {
        let inner = self.inner.read().await;
        let mut positions: Vec<Position> = inner.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        positions
    }

    pub async fn get(&self, symbol: &str) -> Option<Position> {
        self.inner.read().await.positions.get(symbol).cloned()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        let inner = self.inner.read().await;
        inner.positions.contains_key(symbol) || inner.opening.contains(symbol)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.positions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Open positions of one mode
    pub async fn count_by_mode(&self, mode: TradingMode) -> usize {
        let inner = self.inner.read().await;
        inner.positions.values().filter(|p| p.mode == mode).count()
    }

    pub async fn counts_by_mode(&self) -> BTreeMap<TradingMode, usize> {
        let inner = self.inner.read().await;
        let mut counts: BTreeMap<TradingMode, usize> =
            TradingMode::ALL.iter().map(|m| (*m, 0)).collect();
        for position in inner.positions.values() {
            *counts.entry(position.mode).or_default() += 1;
        }
        counts
    }

    // ========================================================================
    // Opening
    // ========================================================================

    /// Place a market entry and record the position as UNPROTECTED.
    ///
    /// At most one position per symbol; a second request for a tracked (or
    /// currently opening) symbol is rejected before touching the exchange.
    pub async fn open_position(
        &self,
        placement: &Placement<'_>,
        request: OpenRequest,
    ) -> Result<Position> {
        {
            let mut inner = self.inner.write().await;
            if inner.positions.contains_key(&request.symbol)
                || !inner.opening.insert(request.symbol.clone())
            {
                return Err(Error::DuplicatePosition(request.symbol));
            }
        }

        let result = self.enter(placement, &request).await;

        let mut inner = self.inner.write().await;
        inner.opening.remove(&request.symbol);
        let position = result?;
        inner
            .positions
            .insert(position.symbol.clone(), position.clone());
        Ok(position)
    }

    async fn enter(&self, placement: &Placement<'_>, request: &OpenRequest) -> Result<Position> {
        if request.notional_usd <= Decimal::ZERO {
            return Err(Error::Invalid(format!(
                "notional must be positive, got {}",
                request.notional_usd
            )));
        }

        placement
            .set_leverage(&request.symbol, request.leverage)
            .await?;
        let mark = placement.get_mark_price(&request.symbol).await?;
        if mark <= Decimal::ZERO {
            return Err(Error::Invalid(format!(
                "no usable price for {}",
                request.symbol
            )));
        }

        let quantity = (request.notional_usd / mark).round_dp(6);
        if quantity <= Decimal::ZERO {
            return Err(Error::Invalid(format!(
                "size rounds to zero for {} at {}",
                request.symbol, mark
            )));
        }

        let order = OrderRequest::market(&request.symbol, request.side.entry_side(), quantity)
            .with_client_id(client_order_id("open"));
        let (ack, fill_price) = placement.market_fill(order).await?;
        let filled = if ack.filled_qty > Decimal::ZERO {
            ack.filled_qty
        } else {
            quantity
        };

        let now = self.clock.now();
        let mut position = Position::new(
            &request.symbol,
            request.side,
            request.mode,
            fill_price,
            filled,
            request.leverage,
            now,
        );
        position.apply_levels(request.sl_percent, request.tp_percent, now);
        position.trailing = request.trailing.clone();
        position.source = request.source;
        position.decision = request.decision.clone();

        info!(
            "[LEDGER] {} opened {:?} {} {} @ {} ({}x, mode {})",
            self.user_id,
            position.side,
            position.quantity,
            position.symbol,
            fill_price,
            position.leverage,
            position.mode
        );
        Ok(position)
    }

    // ========================================================================
    // Closing
    // ========================================================================

    /// Close one tracked position with a reduce-only market order
    pub async fn close_position(
        &self,
        placement: &Placement<'_>,
        symbol: &str,
        reason: CloseReason,
    ) -> Result<TradeResult> {
        let position = self
            .get(symbol)
            .await
            .ok_or_else(|| Error::UnknownPosition(symbol.to_string()))?;

        let order = OrderRequest::close(symbol, position.side, position.quantity)
            .with_client_id(client_order_id("close"));
        let (_, exit_price) = placement.market_fill(order).await?;

        for order_id in &position.protective_order_ids {
            if let Err(e) = placement.cancel_order(symbol, order_id).await {
                debug!("[LEDGER] Leftover protective order {} on {}: {}", order_id, symbol, e);
            }
        }

        let trade = self.settle(&position, exit_price, reason);
        self.inner.write().await.positions.remove(symbol);

        info!(
            "[LEDGER] {} closed {} ({:?}) pnl {} ({}%)",
            self.user_id,
            symbol,
            reason,
            trade.realized_pnl.round_dp(4),
            trade.pnl_percent.round_dp(2)
        );
        Ok(trade)
    }

    /// Close every tracked position, continuing past per-symbol failures
    pub async fn close_all_positions(&self) -> CloseAllReport {
        let symbols: Vec<Symbol> = self
            .positions()
            .await
            .into_iter()
            .map(|p| p.symbol)
            .collect();

        let mut report = CloseAllReport::default();
        if symbols.is_empty() {
            return report;
        }

        let placement = self.venue.placement().await;
        for symbol in symbols {
            match self
                .close_position(&placement, &symbol, CloseReason::CloseAll)
                .await
            {
                Ok(trade) => {
                    report.closed += 1;
                    report.total_pnl += trade.realized_pnl;
                    report.results.push(trade);
                }
                Err(e) => {
                    warn!("[LEDGER] {} failed to close {}: {}", self.user_id, symbol, e);
                    report.errors.push(ItemError::new(symbol, e));
                }
            }
        }

        info!(
            "[LEDGER] {} close-all: {} closed, {} failed, pnl {}",
            self.user_id,
            report.closed,
            report.errors.len(),
            report.total_pnl.round_dp(4)
        );
        report
    }

    /// Entries no longer open on the exchange become trade results.
    ///
    /// The close reason is inferred from the mark price against the levels.
    pub async fn reconcile_closed(&self) -> Result<Vec<TradeResult>> {
        let live = self.venue.get_positions().await?;
        let open: HashSet<(Symbol, PositionSide)> = live
            .iter()
            .filter(|p| p.quantity > Decimal::ZERO)
            .map(|p| (p.symbol.clone(), p.side))
            .collect();

        let gone: Vec<Position> = self
            .positions()
            .await
            .into_iter()
            .filter(|p| !open.contains(&(p.symbol.clone(), p.side)))
            .collect();

        let mut trades = Vec::with_capacity(gone.len());
        for position in gone {
            let exit = match self.venue.get_mark_price(&position.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(
                        "[LEDGER] No mark price for closed {} ({}), using entry",
                        position.symbol, e
                    );
                    position.entry_price
                }
            };
            let reason = infer_close_reason(&position, exit);
            let trade = self.settle(&position, exit, reason);

            let mut inner = self.inner.write().await;
            // Re-opened or already removed in the meantime
            let current = inner.positions.get(&position.symbol).map(|p| p.opened_at);
            if current != Some(position.opened_at) {
                continue;
            }
            inner.positions.remove(&position.symbol);
            drop(inner);

            info!(
                "[LEDGER] {} detected exchange-side close of {} ({:?})",
                self.user_id, position.symbol, reason
            );
            trades.push(trade);
        }
        Ok(trades)
    }

    fn settle(&self, position: &Position, exit_price: Decimal, reason: CloseReason) -> TradeResult {
        let closed_at = self.clock.now();
        TradeResult {
            id: Uuid::new_v4(),
            symbol: position.symbol.clone(),
            side: position.side,
            mode: position.mode,
            source: position.source,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            realized_pnl: position.unrealized_pnl(exit_price),
            pnl_percent: position.roi_percent(exit_price),
            duration_secs: (closed_at - position.opened_at).num_seconds(),
            close_reason: reason,
            opened_at: position.opened_at,
            closed_at,
            decision: position.decision.clone(),
        }
    }

    // ========================================================================
    // Exchange sync
    // ========================================================================

    /// Rebuild the ledger from the exchange's open positions.
    ///
    /// If the position query itself fails, the ledger is left untouched and
    /// the error is returned. A failure while inspecting one symbol's orders
    /// stops the sync; the entries reconciled so far are kept, as are prior
    /// entries for symbols not reached.
    pub async fn force_sync_with_exchange(&self, import_defaults: &ModeConfig) -> Result<SyncReport> {
        let live = self.venue.get_positions().await?;
        let previous: HashMap<Symbol, Position> = self.inner.read().await.positions.clone();

        let mut report = SyncReport::default();
        let mut rebuilt: HashMap<Symbol, Position> = HashMap::new();
        let mut reached: HashSet<Symbol> = HashSet::new();

        for exchange_position in live.iter().filter(|p| p.quantity > Decimal::ZERO) {
            let symbol = exchange_position.symbol.clone();
            reached.insert(symbol.clone());

            let orders = match self.venue.get_open_orders(&symbol).await {
                Ok(orders) => orders,
                Err(e) => {
                    warn!("[LEDGER] {} sync aborted at {}: {}", self.user_id, symbol, e);
                    report.errors.push(ItemError::new(&symbol, e));
                    report.aborted = true;
                    break;
                }
            };

            let prior = previous
                .get(&symbol)
                .filter(|p| p.side == exchange_position.side);
            let position = self.import(exchange_position, prior, &orders, import_defaults);
            rebuilt.insert(symbol, position);
            report.reconciled += 1;
        }

        let mut inner = self.inner.write().await;
        if report.aborted {
            for (symbol, position) in previous {
                if !reached.contains(&symbol) {
                    rebuilt.entry(symbol).or_insert(position);
                }
            }
        }
        inner.positions = rebuilt;
        drop(inner);

        info!(
            "[LEDGER] {} synced {} position(s) from exchange{}",
            self.user_id,
            report.reconciled,
            if report.aborted { " (aborted)" } else { "" }
        );
        Ok(report)
    }

    fn import(
        &self,
        live: &ExchangePosition,
        prior: Option<&Position>,
        orders: &[OpenOrder],
        defaults: &ModeConfig,
    ) -> Position {
        let now = self.clock.now();
        let protective: Vec<&OpenOrder> = orders
            .iter()
            .filter(|o| o.reduce_only && o.kind.is_conditional() && o.side == live.side.exit_side())
            .collect();
        let has_stop = protective.iter().any(|o| o.kind == OrderKind::StopMarket);
        let has_tp = protective.iter().any(|o| o.kind == OrderKind::TakeProfitMarket);

        let mut position = Position::new(
            &live.symbol,
            live.side,
            TradingMode::Swing,
            live.entry_price,
            live.quantity,
            live.leverage,
            now,
        );

        match prior {
            Some(prior) => {
                position.mode = prior.mode;
                position.source = prior.source;
                position.custom_roi_percent = prior.custom_roi_percent;
                position.decision = prior.decision.clone();
                position.trailing = prior.trailing.clone();
                position.opened_at = prior.opened_at;
                if prior.entry_price == live.entry_price {
                    position.stop_loss = prior.stop_loss;
                    position.take_profits = prior.take_profits.clone();
                    position.levels_updated_at = prior.levels_updated_at;
                } else {
                    position.apply_levels(IMPORTED_SL_PERCENT, defaults.tp_percent, now);
                }
            }
            None => {
                position.source = SourceTag::Manual;
                position.trailing = trailing_from(defaults);
                position.apply_levels(IMPORTED_SL_PERCENT, defaults.tp_percent, now);
            }
        }

        if has_stop && has_tp {
            position.protection = ProtectionState::Protected;
            position.protective_order_ids = protective.iter().map(|o| o.order_id.clone()).collect();
        }
        position
    }

    // ========================================================================
    // Mutations used by the supervisor and admin endpoints
    // ========================================================================

    /// Move a position's protection state along a legal edge
    pub async fn transition_protection(&self, symbol: &str, next: ProtectionState) -> Result<()> {
        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| Error::UnknownPosition(symbol.to_string()))?;

        let current = position.protection;
        if !current.can_transition_to(next) {
            return Err(Error::invalid_transition(symbol, current, next));
        }
        if current != next {
            debug!("[LEDGER] {} {}: {} -> {}", self.user_id, symbol, current.as_str(), next.as_str());
        }
        position.protection = next;
        Ok(())
    }

    pub async fn set_protective_orders(&self, symbol: &str, order_ids: Vec<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| Error::UnknownPosition(symbol.to_string()))?;
        position.protective_order_ids = order_ids;
        Ok(())
    }

    /// Recompute SL/TP prices from percentage distances off entry
    pub async fn update_levels(
        &self,
        symbol: &str,
        sl_percent: Decimal,
        tp_percent: Decimal,
    ) -> Result<Position> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| Error::UnknownPosition(symbol.to_string()))?;
        position.apply_levels(sl_percent, tp_percent, now);
        Ok(position.clone())
    }

    /// Set or clear a per-position ROI target (0-1000%)
    pub async fn set_custom_roi(&self, symbol: &str, roi_percent: Option<Decimal>) -> Result<()> {
        let roi_percent = roi_percent.map(validate_roi_percent).transpose()?;
        let mut inner = self.inner.write().await;
        let position = inner
            .positions
            .get_mut(symbol)
            .ok_or_else(|| Error::UnknownPosition(symbol.to_string()))?;
        position.custom_roi_percent = roi_percent;
        info!(
            "[LEDGER] {} custom ROI for {}: {:?}",
            self.user_id, symbol, roi_percent
        );
        Ok(())
    }

    /// Forget every entry without touching the exchange
    pub async fn clear(&self) {
        self.inner.write().await.positions.clear();
    }
}

fn client_order_id(purpose: &str) -> String {
    format!("snt-{}-{}", purpose, Uuid::new_v4().simple())
}

/// Best guess at why the exchange closed a position
fn infer_close_reason(position: &Position, exit: Decimal) -> CloseReason {
    if position.stop_breached(exit) {
        return CloseReason::StopLoss;
    }
    let tp_hit = position.take_profits.first().is_some_and(|tp| match position.side {
        PositionSide::Long => exit >= tp.price,
        PositionSide::Short => exit <= tp.price,
    });
    if tp_hit {
        CloseReason::TakeProfit
    } else {
        CloseReason::Manual
    }
}
