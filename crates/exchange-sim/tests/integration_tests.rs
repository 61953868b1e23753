use rust_decimal_macros::dec;
use sentinel_clock::{Clock, ManualClock};
use sentinel_core::{PositionSide, Side};
use sentinel_ports::{ExchangeClient, ExchangeClientFactory, OrderKind, OrderRequest};
use exchange_sim::{Fault, PaperClientFactory, PaperOp};

#[tokio::test]
async fn test_protected_long_hits_take_profit() {
    let _ = env_logger::try_init();
    let clock = ManualClock::new(None);
    let factory = PaperClientFactory::new(clock.clone());
    let account = factory.paper_account("alice");
    let client = factory.create(&"alice".to_string(), true).await.unwrap();

    account.set_mark_price("BTCUSDT", dec!(50000)).await;
    client.set_leverage("BTCUSDT", 10).await.unwrap();
    client
        .place_order(OrderRequest::market("BTCUSDT", Side::Buy, dec!(0.1)))
        .await
        .unwrap();
    client
        .place_order(OrderRequest::protective(
            "BTCUSDT",
            PositionSide::Long,
            OrderKind::StopMarket,
            dec!(0.1),
            dec!(49000),
        ))
        .await
        .unwrap();
    client
        .place_order(OrderRequest::protective(
            "BTCUSDT",
            PositionSide::Long,
            OrderKind::TakeProfitMarket,
            dec!(0.05),
            dec!(51000),
        ))
        .await
        .unwrap();
    assert_eq!(client.get_open_orders("BTCUSDT").await.unwrap().len(), 2);

    // Half the position comes off at the first target
    account.set_mark_price("BTCUSDT", dec!(51000)).await;
    let positions = client.get_positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, dec!(0.05));
    assert_eq!(positions[0].leverage, 10);

    // The stop takes the rest and nothing is left resting
    account.set_mark_price("BTCUSDT", dec!(48900)).await;
    assert!(client.get_positions().await.unwrap().is_empty());
    assert!(client.get_open_orders("BTCUSDT").await.unwrap().is_empty());

    let income = client
        .get_income_history(clock.now() - chrono::Duration::hours(1), 10)
        .await
        .unwrap();
    assert_eq!(income.len(), 2);
    assert_eq!(income[0].amount, dec!(50));
    assert_eq!(income[1].amount, dec!(-55));

    let account_info = client.get_account_info().await.unwrap();
    assert_eq!(account_info.total_balance, dec!(9995));
}

#[tokio::test]
async fn test_cancel_and_transient_failures() {
    let _ = env_logger::try_init();
    let factory = PaperClientFactory::new(ManualClock::new(None));
    let account = factory.paper_account("bob");
    account
        .seed_position("ETHUSDT", PositionSide::Short, dec!(3000), dec!(1), 5)
        .await;

    account.inject(PaperOp::PlaceConditional, Fault::FailNext(1)).await;
    let stop = OrderRequest::protective(
        "ETHUSDT",
        PositionSide::Short,
        OrderKind::StopMarket,
        dec!(1),
        dec!(3100),
    );
    let err = account.place_order(stop.clone()).await.unwrap_err();
    assert!(err.is_retryable());

    let ack = account.place_order(stop).await.unwrap();
    account.cancel_order("ETHUSDT", &ack.order_id).await.unwrap();
    assert!(account.cancel_order("ETHUSDT", &ack.order_id).await.is_err());
    assert!(account.resting_orders().await.is_empty());
    assert_eq!(account.order_history().await.len(), 1);
}
