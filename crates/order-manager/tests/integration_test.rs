//! Ledger and protection supervisor against the paper exchange

use exchange_sim::{Fault, PaperConfig, PaperExchange, PaperOp};
use rust_decimal_macros::dec;
use sentinel_clock::ManualClock;
use sentinel_core::{
    CloseReason, ModeConfig, PositionSide, ProtectionState, SourceTag, TradingMode,
};
use sentinel_order_manager::{
    DynamicSlTpConfig, Error, ExecutionVenue, JobQueue, JobQueueConfig, JobStatus, OpenRequest,
    PositionLedger, ProtectionConfig, ProtectionSupervisor, RecalcReport, SlTpCalculator,
    VenueConfig,
};
use sentinel_ports::{ExchangeClient, ExchangeError, OrderKind};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    clock: Arc<ManualClock>,
    exchange: Arc<PaperExchange>,
    ledger: Arc<PositionLedger>,
    supervisor: Arc<ProtectionSupervisor>,
}

fn fixture(venue_config: VenueConfig) -> Fixture {
    let clock = ManualClock::new(None);
    let exchange = Arc::new(PaperExchange::new(PaperConfig::default(), clock.clone()));
    let venue = Arc::new(ExecutionVenue::new(exchange.clone(), venue_config));
    let ledger = Arc::new(PositionLedger::new("alice", venue, clock.clone()));
    let supervisor = Arc::new(ProtectionSupervisor::new(
        ledger.clone(),
        None,
        SlTpCalculator::new(DynamicSlTpConfig::default()),
        clock.clone(),
        ProtectionConfig::default(),
    ));
    Fixture {
        clock,
        exchange,
        ledger,
        supervisor,
    }
}

async fn open_protected_long(f: &Fixture, symbol: &str) {
    let config = ModeConfig::defaults_for(TradingMode::Scalp);
    let request = OpenRequest::from_mode(symbol, PositionSide::Long, TradingMode::Scalp, &config);
    let _guard = f.supervisor.lock_symbol(symbol).await;
    let placement = f.ledger.venue().placement().await;
    f.ledger.open_position(&placement, request).await.unwrap();
    f.supervisor.protect(&placement, symbol).await.unwrap();
}

async fn resting_ids(exchange: &PaperExchange, symbol: &str) -> Vec<String> {
    let mut ids: Vec<String> = exchange
        .resting_orders()
        .await
        .into_iter()
        .filter(|o| o.symbol == symbol)
        .map(|o| o.order_id)
        .collect();
    ids.sort();
    ids
}

async fn strip_orders(exchange: &PaperExchange, symbol: &str) {
    for order in exchange.resting_orders().await {
        if order.symbol == symbol {
            exchange.cancel_order(symbol, &order.order_id).await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_open_and_protect() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;

    open_protected_long(&f, "BTCUSDT").await;

    let position = f.ledger.get("BTCUSDT").await.unwrap();
    assert_eq!(position.quantity, dec!(0.008));
    assert_eq!(position.leverage, 8);
    assert_eq!(position.protection, ProtectionState::Protected);
    // SL + four TP stages
    assert_eq!(position.protective_order_ids.len(), 5);
    assert_eq!(f.exchange.resting_orders().await.len(), 5);

    // One position per symbol
    let config = ModeConfig::defaults_for(TradingMode::Scalp);
    let again = OpenRequest::from_mode("BTCUSDT", PositionSide::Long, TradingMode::Scalp, &config);
    let placement = f.ledger.venue().placement().await;
    let err = f.ledger.open_position(&placement, again).await.unwrap_err();
    assert!(matches!(err, Error::DuplicatePosition(_)));
}

#[tokio::test]
async fn test_failed_protection_rolls_back() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;

    let config = ModeConfig::defaults_for(TradingMode::Scalp);
    let request = OpenRequest::from_mode("BTCUSDT", PositionSide::Long, TradingMode::Scalp, &config);
    let placement = f.ledger.venue().placement().await;
    f.ledger.open_position(&placement, request).await.unwrap();

    // The stop goes in, the first take-profit fails
    f.exchange
        .inject(PaperOp::PlaceConditional, Fault::FailAfter(1))
        .await;
    assert!(f.supervisor.protect(&placement, "BTCUSDT").await.is_err());
    assert!(f.exchange.resting_orders().await.is_empty());
    assert_eq!(
        f.ledger.get("BTCUSDT").await.unwrap().protection,
        ProtectionState::Unprotected
    );
}

#[tokio::test]
async fn test_audit_heals_lost_protection() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;
    open_protected_long(&f, "BTCUSDT").await;

    let report = f.supervisor.audit().await;
    assert_eq!(report.verified, 1);

    strip_orders(&f.exchange, "BTCUSDT").await;
    let report = f.supervisor.audit().await;
    assert_eq!(report.lost_protection, 1);
    assert_eq!(report.healed, 1);
    assert_eq!(f.exchange.resting_orders().await.len(), 5);

    let status = f.supervisor.protection_status().await;
    assert_eq!(status.summary.protected, 1);
    assert_eq!(status.summary.health_pct, 100.0);
    assert_eq!(status.positions[0].heal_attempts, 0);
}

#[tokio::test]
async fn test_repeated_heal_failures_escalate_to_emergency() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;
    open_protected_long(&f, "BTCUSDT").await;

    strip_orders(&f.exchange, "BTCUSDT").await;
    f.exchange
        .inject(PaperOp::PlaceConditional, Fault::FailAlways)
        .await;

    let first = f.supervisor.audit().await;
    assert_eq!(first.still_healing, 1);
    let second = f.supervisor.audit().await;
    assert_eq!(second.still_healing, 1);
    let third = f.supervisor.audit().await;
    assert_eq!(third.new_emergencies, 1);

    // Emergency is terminal for the audit loop
    let fourth = f.supervisor.audit().await;
    assert_eq!(fourth.skipped_emergencies, 1);
    let status = f.supervisor.protection_status().await;
    assert_eq!(status.summary.emergency, 1);
    assert_eq!(status.summary.health_pct, 0.0);
}

#[tokio::test]
async fn test_exchange_side_stop_is_reconciled() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;
    open_protected_long(&f, "BTCUSDT").await;

    // Scalp stop sits 1.5% below entry
    f.exchange.set_mark_price("BTCUSDT", dec!(49000)).await;
    let trades = f.ledger.reconcile_closed().await.unwrap();

    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].close_reason, CloseReason::StopLoss);
    assert!(trades[0].is_loss());
    assert!(f.ledger.is_empty().await);
}

#[tokio::test]
async fn test_force_sync_imports_manual_position() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange
        .seed_position("ETHUSDT", PositionSide::Short, dec!(3000), dec!(2), 4)
        .await;

    let defaults = ModeConfig::defaults_for(TradingMode::Swing);
    let report = f.ledger.force_sync_with_exchange(&defaults).await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert!(!report.aborted);

    let imported = f.ledger.get("ETHUSDT").await.unwrap();
    assert_eq!(imported.source, SourceTag::Manual);
    assert_eq!(imported.mode, TradingMode::Swing);
    assert_eq!(imported.protection, ProtectionState::Unprotected);
    // Imported stop sits 2% above a short entry
    assert_eq!(imported.stop_loss, Some(dec!(3060)));
}

#[tokio::test]
async fn test_force_sync_keeps_progress_on_partial_failure() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;
    f.exchange.set_mark_price("SOLUSDT", dec!(100)).await;
    open_protected_long(&f, "BTCUSDT").await;
    open_protected_long(&f, "SOLUSDT").await;
    f.exchange
        .seed_position("ETHUSDT", PositionSide::Short, dec!(3000), dec!(2), 4)
        .await;

    // Symbols are visited in order: BTCUSDT passes, ETHUSDT fails
    f.exchange
        .inject(PaperOp::GetOpenOrders, Fault::FailAfter(1))
        .await;
    let defaults = ModeConfig::defaults_for(TradingMode::Swing);
    let report = f.ledger.force_sync_with_exchange(&defaults).await.unwrap();

    assert!(report.aborted);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].key, "ETHUSDT");

    // Reconciled entry keeps its tracking data
    let btc = f.ledger.get("BTCUSDT").await.unwrap();
    assert_eq!(btc.source, SourceTag::Ai);
    assert_eq!(btc.mode, TradingMode::Scalp);
    assert_eq!(btc.protection, ProtectionState::Protected);
    assert_eq!(btc.protective_order_ids.len(), 5);
    // Failed symbol is not imported, the one never reached is kept
    assert!(!f.ledger.contains("ETHUSDT").await);
    let sol = f.ledger.get("SOLUSDT").await.unwrap();
    assert_eq!(sol.protection, ProtectionState::Protected);
    assert_eq!(f.ledger.len().await, 2);
}

#[tokio::test]
async fn test_close_all_continues_past_failures() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;
    f.exchange.set_mark_price("ETHUSDT", dec!(3000)).await;
    f.exchange.set_mark_price("SOLUSDT", dec!(100)).await;
    // Distinct open times fix the close order: BTC, ETH, SOL
    open_protected_long(&f, "BTCUSDT").await;
    f.clock.advance(chrono::Duration::seconds(1));
    open_protected_long(&f, "ETHUSDT").await;
    f.clock.advance(chrono::Duration::seconds(1));
    open_protected_long(&f, "SOLUSDT").await;

    f.exchange.reject_symbol("ETHUSDT").await;
    f.exchange.set_mark_price("BTCUSDT", dec!(50500)).await;
    f.exchange.set_mark_price("SOLUSDT", dec!(101)).await;
    let report = f.ledger.close_all_positions().await;

    assert_eq!(report.closed, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].key, "ETHUSDT");
    // 0.008 BTC up 500 plus 4 SOL up 1
    assert_eq!(report.total_pnl, dec!(8));
    let closed: Vec<&str> = report.results.iter().map(|t| t.symbol.as_str()).collect();
    assert_eq!(closed, vec!["BTCUSDT", "SOLUSDT"]);
    assert!(f.ledger.contains("ETHUSDT").await);
    assert!(!f.ledger.contains("BTCUSDT").await);
    assert!(!f.ledger.contains("SOLUSDT").await);
}

#[tokio::test]
async fn test_recalculate_replaces_stale_levels() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;
    open_protected_long(&f, "BTCUSDT").await;
    let before = resting_ids(&f.exchange, "BTCUSDT").await;

    // Fresh levels are left alone
    let report = f.supervisor.recalculate_adaptive_sltp(None).await;
    assert_eq!(report.candidates, 0);

    f.clock.advance(chrono::Duration::minutes(16));
    let report = f.supervisor.recalculate_adaptive_sltp(None).await;
    assert_eq!(report.candidates, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.reprotected, 1);
    assert!(report.errors.is_empty());

    // No scanner: ATR falls back to 1%, scalp SL 0.5% and TP 1%
    let position = f.ledger.get("BTCUSDT").await.unwrap();
    assert_eq!(position.stop_loss, Some(dec!(49750)));
    assert_eq!(position.take_profits.last().unwrap().price, dec!(50500));
    assert_eq!(position.protection, ProtectionState::Protected);

    let after = resting_ids(&f.exchange, "BTCUSDT").await;
    assert_eq!(after.len(), 5);
    assert!(after.iter().all(|id| !before.contains(id)));
    let mut tracked = position.protective_order_ids.clone();
    tracked.sort();
    assert_eq!(after, tracked);
}

#[tokio::test]
async fn test_recalculate_as_background_job() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;
    open_protected_long(&f, "BTCUSDT").await;
    f.clock.advance(chrono::Duration::minutes(16));

    let queue = JobQueue::new(JobQueueConfig::default(), f.clock.clone());
    let id = f
        .supervisor
        .recalculate_adaptive_sltp_async(&queue)
        .await
        .unwrap();

    let record = loop {
        let record = queue.get_job(&id).await.unwrap();
        if record.status.is_finished() {
            break record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.kind, "sltp_recalc");
    assert_eq!(record.total, 1);
    assert_eq!(record.succeeded, 1);
    assert_eq!(record.progress_pct, 100.0);

    let report: RecalcReport = serde_json::from_value(record.result.unwrap()).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.reprotected, 1);

    let position = f.ledger.get("BTCUSDT").await.unwrap();
    assert_eq!(position.stop_loss, Some(dec!(49750)));
    let stops: Vec<_> = f
        .exchange
        .resting_orders()
        .await
        .into_iter()
        .filter(|o| o.kind == OrderKind::StopMarket)
        .collect();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].trigger_price, Some(dec!(49750)));
    assert_eq!(f.exchange.resting_orders().await.len(), 5);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_audit_skips_symbol_being_placed() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig::default());
    f.exchange.set_mark_price("BTCUSDT", dec!(50000)).await;

    let config = ModeConfig::defaults_for(TradingMode::Scalp);
    let request = OpenRequest::from_mode("BTCUSDT", PositionSide::Long, TradingMode::Scalp, &config);
    let guard = f.supervisor.lock_symbol("BTCUSDT").await;
    let placement = f.ledger.venue().placement().await;
    f.ledger.open_position(&placement, request).await.unwrap();

    // Entry is in, protection has not been placed yet
    let report = f.supervisor.audit().await;
    assert_eq!(report.in_flight, 1);
    assert_eq!(report.healed, 0);
    assert!(f.exchange.resting_orders().await.is_empty());

    f.supervisor.protect(&placement, "BTCUSDT").await.unwrap();
    drop(placement);
    drop(guard);

    let report = f.supervisor.audit().await;
    assert_eq!(report.verified, 1);
    assert_eq!(f.exchange.resting_orders().await.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_exchange_times_out() {
    let _ = env_logger::try_init();
    let f = fixture(VenueConfig {
        call_timeout: Duration::from_secs(2),
    });
    f.exchange.inject(PaperOp::GetPositions, Fault::Hang).await;

    let err = f.ledger.reconcile_closed().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Exchange(ExchangeError::Timeout { after_ms: 2000, .. })
    ));
}
