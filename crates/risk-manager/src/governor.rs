//! Risk Governor
//!
//! Circuit breaker over a tenant's closed trades:
//! - Rolling 1 minute / 1 hour / 24 hour windows keyed by outcome time
//! - Consecutive-loss counter by arrival
//! - CLOSED → OPEN on any breach, OPEN → HALF_OPEN after cooldown,
//!   HALF_OPEN resolves on the next outcome

use crate::state::{BreakerSnapshot, CircuitState, TradeGate, TripReason, WindowTotals};
use chrono::Duration;
use log::{error, info, warn};
use rust_decimal::Decimal;
use sentinel_core::{CircuitBreakerConfig, CircuitBreakerPatch, ConfigError, Timestamp};
use sentinel_ports::Clock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One recorded trade outcome
#[derive(Debug, Clone, Copy)]
struct OutcomeRecord {
    pnl_percent: Decimal,
    at: Timestamp,
}

struct BreakerInner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Arrival order; windows filter by `at`
    outcomes: VecDeque<OutcomeRecord>,
    consecutive_losses: u32,
    trip_reason: Option<TripReason>,
    tripped_at: Option<Timestamp>,
    cooldown_until: Option<Timestamp>,
    trip_count: u64,
}

impl BreakerInner {
    /// Drop outcomes older than the longest window
    fn evict(&mut self, now: Timestamp) {
        let horizon = now - Duration::days(1);
        self.outcomes.retain(|o| o.at >= horizon);
    }

    fn totals(&self, now: Timestamp) -> WindowTotals {
        let minute_start = now - Duration::minutes(1);
        let hour_start = now - Duration::hours(1);
        let day_start = now - Duration::days(1);

        let mut totals = WindowTotals::default();
        for outcome in &self.outcomes {
            let loss = if outcome.pnl_percent < Decimal::ZERO {
                -outcome.pnl_percent
            } else {
                Decimal::ZERO
            };
            if outcome.at >= day_start {
                totals.daily_trades += 1;
                totals.daily_loss += loss;
            }
            if outcome.at >= hour_start {
                totals.hourly_loss += loss;
            }
            if outcome.at >= minute_start {
                totals.trades_last_minute += 1;
            }
        }
        totals
    }

    /// First limit currently breached, if any
    fn breach(&self, totals: &WindowTotals, include_consecutive: bool) -> Option<(TripReason, String)> {
        let c = &self.config;
        if include_consecutive && self.consecutive_losses >= c.max_consecutive_losses {
            return Some((
                TripReason::ConsecutiveLosses,
                format!(
                    "{} consecutive losses (max {})",
                    self.consecutive_losses, c.max_consecutive_losses
                ),
            ));
        }
        if totals.hourly_loss >= c.max_loss_per_hour {
            return Some((
                TripReason::HourlyLoss,
                format!("{}% >= {}% in the last hour", totals.hourly_loss, c.max_loss_per_hour),
            ));
        }
        if totals.daily_loss >= c.max_daily_loss {
            return Some((
                TripReason::DailyLoss,
                format!("{}% >= {}% in the last 24h", totals.daily_loss, c.max_daily_loss),
            ));
        }
        if totals.trades_last_minute >= c.max_trades_per_minute {
            return Some((
                TripReason::TradesPerMinute,
                format!("{} trades in the last minute", totals.trades_last_minute),
            ));
        }
        if totals.daily_trades >= c.max_daily_trades {
            return Some((
                TripReason::DailyTrades,
                format!("{} trades in the last 24h", totals.daily_trades),
            ));
        }
        None
    }

    /// OPEN → HALF_OPEN once the cooldown has run out; true if that happened
    fn leave_cooldown(&mut self, now: Timestamp) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }
        if matches!(self.cooldown_until, Some(until) if now < until) {
            return false;
        }
        let reason = self.trip_reason.unwrap_or(TripReason::ConsecutiveLosses);
        info!("[RISK] Cooldown elapsed, breaker half-open ({})", reason);
        self.state = CircuitState::HalfOpen;
        true
    }

    fn trip(&mut self, reason: TripReason, detail: &str, now: Timestamp) {
        self.state = CircuitState::Open;
        self.trip_reason = Some(reason);
        self.tripped_at = Some(now);
        self.cooldown_until = Some(now + self.config.cooldown());
        self.trip_count += 1;
        error!(
            "[RISK] Circuit breaker tripped ({}): {} - cooling down {}m",
            reason, detail, self.config.cooldown_minutes
        );
    }
}

/// Per-tenant circuit breaker. All state sits behind one lock, so
/// concurrent outcome reports from parallel closes serialize cleanly.
pub struct RiskGovernor {
    clock: Arc<dyn Clock>,
    inner: RwLock<BreakerInner>,
}

impl RiskGovernor {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: RwLock::new(BreakerInner {
                config,
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                consecutive_losses: 0,
                trip_reason: None,
                tripped_at: None,
                cooldown_until: None,
                trip_count: 0,
            }),
        }
    }

    /// May the tenant open a trade now?
    ///
    /// Moves OPEN to HALF_OPEN once the cooldown has elapsed. HALF_OPEN lets
    /// a trial trade through unless a loss window is still over its limit.
    pub async fn can_trade(&self) -> TradeGate {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        if !inner.config.enabled {
            return TradeGate::Allowed;
        }

        inner.evict(now);

        if inner.state == CircuitState::Open && !inner.leave_cooldown(now) {
            let reason = inner.trip_reason.unwrap_or(TripReason::ConsecutiveLosses);
            let remaining = inner
                .cooldown_until
                .map(|until| (until - now).num_seconds())
                .unwrap_or(0);
            return TradeGate::Blocked {
                reason,
                detail: format!("circuit breaker open, cooldown remaining {}s", remaining),
            };
        }

        let totals = inner.totals(now);
        let include_consecutive = inner.state == CircuitState::Closed;
        match inner.breach(&totals, include_consecutive) {
            Some((reason, detail)) => TradeGate::Blocked { reason, detail },
            None => TradeGate::Allowed,
        }
    }

    /// Record a closed trade's ROI percent at its close time.
    ///
    /// Returns the breaker state after the outcome has been evaluated.
    pub async fn record_outcome(&self, pnl_percent: Decimal, at: Timestamp) -> CircuitState {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        inner.outcomes.push_back(OutcomeRecord { pnl_percent, at });
        inner.evict(now);

        let is_loss = pnl_percent < Decimal::ZERO;
        if is_loss {
            inner.consecutive_losses += 1;
        } else {
            inner.consecutive_losses = 0;
        }

        if !inner.config.enabled {
            return inner.state;
        }

        // The first outcome after the cooldown decides, whether or not
        // anyone asked can_trade in between
        inner.leave_cooldown(now);

        match inner.state {
            CircuitState::HalfOpen => {
                if is_loss {
                    let reason = inner.trip_reason.unwrap_or(TripReason::ConsecutiveLosses);
                    warn!("[RISK] Trial trade lost ({}%), reopening breaker", pnl_percent);
                    inner.trip(reason, "loss while half-open", now);
                } else {
                    info!("[RISK] Trial trade succeeded ({}%), breaker closed", pnl_percent);
                    inner.state = CircuitState::Closed;
                    inner.trip_reason = None;
                    inner.cooldown_until = None;
                }
            }
            CircuitState::Closed => {
                let totals = inner.totals(now);
                if let Some((reason, detail)) = inner.breach(&totals, true) {
                    inner.trip(reason, &detail, now);
                }
            }
            // Late reports during cooldown only feed the counters
            CircuitState::Open => {}
        }

        inner.state
    }

    /// Admin override: back to CLOSED with counters and windows cleared
    pub async fn force_reset(&self) {
        let mut inner = self.inner.write().await;
        info!(
            "[RISK] Circuit breaker force reset (was {:?}, {} consecutive losses)",
            inner.state, inner.consecutive_losses
        );
        inner.state = CircuitState::Closed;
        inner.consecutive_losses = 0;
        inner.trip_reason = None;
        inner.cooldown_until = None;
        inner.outcomes.clear();
    }

    pub async fn set_enabled(&self, enabled: bool) {
        let mut inner = self.inner.write().await;
        if inner.config.enabled != enabled {
            info!("[RISK] Circuit breaker {}", if enabled { "enabled" } else { "disabled" });
        }
        inner.config.enabled = enabled;
    }

    /// Apply a partial config update; nothing changes if validation fails
    pub async fn update_config(
        &self,
        patch: &CircuitBreakerPatch,
    ) -> Result<CircuitBreakerConfig, ConfigError> {
        let mut inner = self.inner.write().await;
        let merged = inner.config.merge(patch)?;
        inner.config = merged.clone();
        info!("[RISK] Circuit breaker config updated: {:?}", merged);
        Ok(merged)
    }

    pub async fn config(&self) -> CircuitBreakerConfig {
        self.inner.read().await.config.clone()
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Window aggregates at the current time
    pub async fn window_totals(&self) -> WindowTotals {
        let now = self.clock.now();
        self.inner.read().await.totals(now)
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        BreakerSnapshot {
            enabled: inner.config.enabled,
            state: inner.state,
            consecutive_losses: inner.consecutive_losses,
            windows: inner.totals(now),
            trip_reason: inner.trip_reason,
            tripped_at: inner.tripped_at,
            cooldown_until: inner.cooldown_until,
            trip_count: inner.trip_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_clock::ManualClock;

    fn governor(max_consecutive: u32) -> (RiskGovernor, Arc<ManualClock>) {
        let clock = ManualClock::new(None);
        let config = CircuitBreakerConfig {
            max_consecutive_losses: max_consecutive,
            ..Default::default()
        };
        (RiskGovernor::new(config, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_consecutive_losses_trip_and_recover() {
        let (gov, clock) = governor(3);

        for _ in 0..3 {
            gov.record_outcome(dec!(-0.5), clock.now()).await;
        }

        let gate = gov.can_trade().await;
        assert!(!gate.is_allowed());
        assert_eq!(gate.reason(), Some("consecutive_losses"));

        // Still blocked just before cooldown ends
        clock.advance(Duration::minutes(29));
        assert!(!gov.can_trade().await.is_allowed());

        // Cooldown elapsed: trial trade allowed
        clock.advance(Duration::minutes(2));
        assert!(gov.can_trade().await.is_allowed());
        assert_eq!(gov.state().await, CircuitState::HalfOpen);

        // A win closes the breaker
        let state = gov.record_outcome(dec!(0.8), clock.now()).await;
        assert_eq!(state, CircuitState::Closed);
        assert_eq!(gov.snapshot().await.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn test_outcome_after_cooldown_resolves_without_gate_check() {
        let (gov, clock) = governor(3);
        for _ in 0..3 {
            gov.record_outcome(dec!(-0.5), clock.now()).await;
        }
        assert_eq!(gov.state().await, CircuitState::Open);

        // A position opened before the trip closes in profit after the cooldown
        clock.advance(Duration::minutes(31));
        let state = gov.record_outcome(dec!(0.8), clock.now()).await;
        assert_eq!(state, CircuitState::Closed);
        assert!(gov.can_trade().await.is_allowed());

        // Within the cooldown a win only feeds the counters
        for _ in 0..3 {
            gov.record_outcome(dec!(-0.5), clock.now()).await;
        }
        clock.advance(Duration::minutes(10));
        let state = gov.record_outcome(dec!(0.8), clock.now()).await;
        assert_eq!(state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_loss_reopens_with_fresh_cooldown() {
        let (gov, clock) = governor(3);
        for _ in 0..3 {
            gov.record_outcome(dec!(-0.2), clock.now()).await;
        }
        clock.advance(Duration::minutes(31));
        assert!(gov.can_trade().await.is_allowed());

        let reopened_at = clock.now();
        let state = gov.record_outcome(dec!(-0.2), reopened_at).await;
        assert_eq!(state, CircuitState::Open);

        let snap = gov.snapshot().await;
        assert_eq!(snap.cooldown_until, Some(reopened_at + Duration::minutes(30)));
        assert_eq!(snap.trip_count, 2);
        assert!(!gov.can_trade().await.is_allowed());
    }

    #[tokio::test]
    async fn test_windows_count_by_timestamp_not_arrival() {
        let (gov, clock) = governor(100);
        let now = clock.now();

        // Arrives last but happened two hours ago
        gov.record_outcome(dec!(-0.5), now - Duration::minutes(10)).await;
        gov.record_outcome(dec!(-0.7), now - Duration::minutes(90)).await;
        gov.record_outcome(dec!(0.4), now - Duration::seconds(30)).await;
        gov.record_outcome(dec!(-0.3), now - Duration::hours(2)).await;

        let totals = gov.window_totals().await;
        assert_eq!(totals.hourly_loss, dec!(0.5));
        assert_eq!(totals.daily_loss, dec!(1.5));
        assert_eq!(totals.trades_last_minute, 1);
        assert_eq!(totals.daily_trades, 4);
    }

    #[tokio::test]
    async fn test_outcomes_older_than_a_day_are_evicted() {
        let (gov, clock) = governor(100);
        gov.record_outcome(dec!(-1), clock.now()).await;

        clock.advance(Duration::hours(25));
        let totals = gov.window_totals().await;
        assert_eq!(totals.daily_trades, 0);
        assert_eq!(totals.daily_loss, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_hourly_loss_trips() {
        let (gov, clock) = governor(100);

        gov.record_outcome(dec!(-2.0), clock.now()).await;
        assert_eq!(gov.state().await, CircuitState::Closed);

        // 3.0% default hourly limit reached
        gov.record_outcome(dec!(-1.0), clock.now()).await;
        assert_eq!(gov.state().await, CircuitState::Open);
        assert_eq!(gov.can_trade().await.reason(), Some("hourly_loss"));
    }

    #[tokio::test]
    async fn test_trade_rate_trips() {
        let (gov, clock) = governor(100);
        gov.update_config(&CircuitBreakerPatch {
            max_trades_per_minute: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();

        for _ in 0..3 {
            gov.record_outcome(dec!(0.1), clock.now()).await;
        }
        assert_eq!(gov.can_trade().await.reason(), Some("trades_per_minute"));
    }

    #[tokio::test]
    async fn test_force_reset_reopens_trading() {
        let (gov, clock) = governor(2);
        gov.record_outcome(dec!(-2.0), clock.now()).await;
        gov.record_outcome(dec!(-2.0), clock.now()).await;
        assert!(!gov.can_trade().await.is_allowed());

        gov.force_reset().await;
        assert!(gov.can_trade().await.is_allowed());
        assert_eq!(gov.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_disabled_breaker_always_allows() {
        let (gov, clock) = governor(1);
        gov.set_enabled(false).await;
        gov.record_outcome(dec!(-10), clock.now()).await;

        assert!(gov.can_trade().await.is_allowed());
        assert_eq!(gov.snapshot().await.label(), "disabled");
    }

    #[tokio::test]
    async fn test_invalid_patch_leaves_config_untouched() {
        let (gov, _clock) = governor(5);
        let result = gov
            .update_config(&CircuitBreakerPatch {
                cooldown_minutes: Some(0),
                max_consecutive_losses: Some(2),
                ..Default::default()
            })
            .await;

        assert!(result.is_err());
        assert_eq!(gov.config().await.max_consecutive_losses, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_outcomes_are_all_counted() {
        let clock = ManualClock::new(None);
        let config = CircuitBreakerConfig {
            max_consecutive_losses: 1_000,
            max_loss_per_hour: dec!(1000),
            max_daily_loss: dec!(1000),
            max_trades_per_minute: 1_000,
            max_daily_trades: 1_000,
            ..Default::default()
        };
        let gov = Arc::new(RiskGovernor::new(config, clock.clone()));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let gov = gov.clone();
            let at = clock.now();
            handles.push(tokio::spawn(async move {
                gov.record_outcome(dec!(-0.1), at).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snap = gov.snapshot().await;
        assert_eq!(snap.consecutive_losses, 50);
        assert_eq!(snap.windows.daily_trades, 50);
        assert_eq!(snap.windows.hourly_loss, dec!(5.0));
    }
}
