//! Circuit breaker lifecycle test
//!
//! Walks a breaker through a realistic trading day:
//! 1. Winning and losing trades interleave without tripping
//! 2. A losing streak trips the breaker
//! 3. Cooldown elapses and the trial trade fails
//! 4. Second cooldown, the trial trade wins, trading resumes

use chrono::Duration;
use rust_decimal_macros::dec;
use sentinel_clock::ManualClock;
use sentinel_core::CircuitBreakerConfig;
use sentinel_ports::Clock;
use sentinel_risk_manager::{CircuitState, RiskGovernor};

#[tokio::test]
async fn test_trading_day_lifecycle() {
    let _ = env_logger::try_init();

    let clock = ManualClock::new(None);
    let governor = RiskGovernor::new(
        CircuitBreakerConfig {
            max_consecutive_losses: 3,
            max_loss_per_hour: dec!(10),
            max_daily_loss: dec!(20),
            ..Default::default()
        },
        clock.clone(),
    );

    // === Step 1: Mixed results ===
    for pnl in [dec!(1.2), dec!(-0.4), dec!(-0.6), dec!(0.9), dec!(-0.3)] {
        clock.advance(Duration::minutes(5));
        governor.record_outcome(pnl, clock.now()).await;
        assert!(governor.can_trade().await.is_allowed());
    }
    assert_eq!(governor.snapshot().await.consecutive_losses, 1);

    // === Step 2: Losing streak ===
    clock.advance(Duration::minutes(5));
    governor.record_outcome(dec!(-0.5), clock.now()).await;
    clock.advance(Duration::minutes(5));
    let state = governor.record_outcome(dec!(-0.5), clock.now()).await;
    assert_eq!(state, CircuitState::Open);

    let snapshot = governor.snapshot().await;
    assert_eq!(snapshot.label(), "tripped");
    assert_eq!(snapshot.trip_count, 1);
    let (allowed, reason) = governor.can_trade().await.as_tuple();
    assert!(!allowed);
    assert_eq!(reason, "consecutive_losses");

    // === Step 3: Trial trade fails ===
    clock.advance(Duration::minutes(30));
    assert!(governor.can_trade().await.is_allowed());
    let state = governor.record_outcome(dec!(-0.2), clock.now()).await;
    assert_eq!(state, CircuitState::Open);
    assert_eq!(
        governor.can_trade().await.reason(),
        Some("consecutive_losses")
    );

    // === Step 4: Trial trade wins ===
    clock.advance(Duration::minutes(30));
    assert!(governor.can_trade().await.is_allowed());
    let state = governor.record_outcome(dec!(0.7), clock.now()).await;
    assert_eq!(state, CircuitState::Closed);

    let snapshot = governor.snapshot().await;
    assert_eq!(snapshot.label(), "active");
    assert_eq!(snapshot.trip_count, 2);
    assert_eq!(snapshot.windows.daily_trades, 9);
}

#[tokio::test]
async fn test_blocked_gate_maps_to_risk_error() {
    let clock = ManualClock::new(None);
    let governor = RiskGovernor::new(
        CircuitBreakerConfig {
            max_consecutive_losses: 1,
            ..Default::default()
        },
        clock.clone(),
    );

    governor.record_outcome(dec!(-0.1), clock.now()).await;

    let err = governor.can_trade().await.into_result().unwrap_err();
    assert_eq!(err.kind(), sentinel_ports::ErrorKind::RiskBlocked);
}
