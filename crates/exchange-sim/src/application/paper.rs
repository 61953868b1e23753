use async_trait::async_trait;
use log::{debug, info};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::{PositionSide, Price, Quantity, Side, Symbol, Timestamp};
use sentinel_ports::{
    AccountInfo, Clock, ExchangeClient, ExchangeError, ExchangePosition, ExchangeResult,
    IncomeRecord, OpenOrder, OrderAck, OrderKind, OrderRequest, OrderStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::model::{Fault, FaultAction, FaultPlan, PaperOp, PaperPosition};

/// Paper exchange configuration
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Client name reported through `ExchangeClient::name`
    pub name: String,
    pub starting_balance: Decimal,
    /// Artificial latency added to every call
    pub latency: Duration,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            name: "paper".to_string(),
            starting_balance: dec!(10000),
            latency: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Book {
    marks: HashMap<Symbol, Price>,
    positions: HashMap<Symbol, PaperPosition>,
    leverage: HashMap<Symbol, u32>,
    /// Resting conditional orders by id
    orders: HashMap<String, OpenOrder>,
    income: Vec<IncomeRecord>,
    /// Every accepted request, in arrival order
    history: Vec<OrderRequest>,
    realized: Decimal,
}

/// Dry-run execution client.
///
/// Market orders fill instantly at the mark price. Conditional orders rest
/// until [`PaperExchange::set_mark_price`] crosses their trigger.
pub struct PaperExchange {
    config: PaperConfig,
    clock: Arc<dyn Clock>,
    book: RwLock<Book>,
    faults: RwLock<FaultPlan>,
    latency: RwLock<Duration>,
    order_seq: AtomicU64,
}

impl PaperExchange {
    pub fn new(config: PaperConfig, clock: Arc<dyn Clock>) -> Self {
        let latency = config.latency;
        Self {
            config,
            clock,
            book: RwLock::new(Book::default()),
            faults: RwLock::new(FaultPlan::default()),
            latency: RwLock::new(latency),
            order_seq: AtomicU64::new(0),
        }
    }

    // ============ Market control ============

    /// Move the mark price, firing any conditional orders it crosses
    pub async fn set_mark_price(&self, symbol: &str, price: Price) {
        let now = self.clock.now();
        let mut book = self.book.write().await;
        book.marks.insert(symbol.to_string(), price);

        let mut triggered: Vec<OpenOrder> = book
            .orders
            .values()
            .filter(|o| o.symbol == symbol && crosses(o, price))
            .cloned()
            .collect();
        // Stops fire before take-profits
        triggered.sort_by_key(|o| (o.kind != OrderKind::StopMarket, o.order_id.clone()));

        for order in triggered {
            if book.orders.remove(&order.order_id).is_none() {
                continue;
            }
            debug!(
                "[PAPER] {} {:?} {} triggered at {}",
                order.symbol, order.kind, order.order_id, price
            );
            Self::reduce(&mut book, symbol, order.side, order.quantity, price, now);
        }
    }

    pub async fn mark_price(&self, symbol: &str) -> Option<Price> {
        self.book.read().await.marks.get(symbol).copied()
    }

    /// Put a position on the account without going through an order,
    /// as if it had been opened by hand on the exchange
    pub async fn seed_position(
        &self,
        symbol: &str,
        side: PositionSide,
        entry_price: Price,
        quantity: Quantity,
        leverage: u32,
    ) {
        let mut book = self.book.write().await;
        book.marks.entry(symbol.to_string()).or_insert(entry_price);
        book.positions.insert(
            symbol.to_string(),
            PaperPosition {
                side,
                entry_price,
                quantity,
                leverage,
            },
        );
    }

    /// Rest a conditional order directly, bypassing fault injection
    pub async fn seed_order(&self, mut order: OpenOrder) -> String {
        if order.order_id.is_empty() {
            order.order_id = self.next_order_id();
        }
        let id = order.order_id.clone();
        self.book.write().await.orders.insert(id.clone(), order);
        id
    }

    /// Drop a position as if it was liquidated or closed elsewhere
    pub async fn remove_position(&self, symbol: &str) -> Option<PaperPosition> {
        let mut book = self.book.write().await;
        book.orders.retain(|_, o| o.symbol != symbol);
        book.positions.remove(symbol)
    }

    pub async fn position(&self, symbol: &str) -> Option<PaperPosition> {
        self.book.read().await.positions.get(symbol).cloned()
    }

    /// Accepted order requests, oldest first
    pub async fn order_history(&self) -> Vec<OrderRequest> {
        self.book.read().await.history.clone()
    }

    pub async fn resting_orders(&self) -> Vec<OpenOrder> {
        self.book.read().await.orders.values().cloned().collect()
    }

    pub async fn realized_pnl(&self) -> Decimal {
        self.book.read().await.realized
    }

    // ============ Fault injection ============

    /// Reject every order for a symbol
    pub async fn reject_symbol(&self, symbol: &str) {
        self.faults
            .write()
            .await
            .rejected_symbols
            .insert(symbol.to_string());
    }

    pub async fn accept_symbol(&self, symbol: &str) {
        self.faults.write().await.rejected_symbols.remove(symbol);
    }

    pub async fn inject(&self, op: PaperOp, fault: Fault) {
        self.faults.write().await.ops.insert(op, fault);
    }

    pub async fn clear_faults(&self) {
        let mut faults = self.faults.write().await;
        faults.ops.clear();
        faults.rejected_symbols.clear();
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    // ============ Internals ============

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.order_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Latency, then the fault plan for this op
    async fn gate(&self, op: PaperOp) -> ExchangeResult<()> {
        let latency = *self.latency.read().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let action = self.faults.write().await.take(op);
        match action {
            FaultAction::Proceed => Ok(()),
            FaultAction::Fail => Err(ExchangeError::Transport(format!(
                "injected failure on {:?}",
                op
            ))),
            FaultAction::Hang => std::future::pending().await,
        }
    }

    async fn check_symbol(&self, symbol: &str) -> ExchangeResult<()> {
        if self.faults.read().await.rejected_symbols.contains(symbol) {
            return Err(ExchangeError::Rejected {
                symbol: symbol.to_string(),
                reason: "symbol rejected by paper exchange".to_string(),
            });
        }
        Ok(())
    }

    /// Reduce (or close) a position with an exit-side fill; returns realized PnL
    fn reduce(
        book: &mut Book,
        symbol: &str,
        exit_side: Side,
        quantity: Quantity,
        price: Price,
        at: Timestamp,
    ) -> Decimal {
        let Some(position) = book.positions.get_mut(symbol) else {
            return Decimal::ZERO;
        };
        if position.side.exit_side() != exit_side {
            return Decimal::ZERO;
        }

        let closed = quantity.min(position.quantity);
        let pnl = position.pnl_at(price, closed);
        position.quantity -= closed;
        let flat = position.quantity <= Decimal::ZERO;

        if flat {
            book.positions.remove(symbol);
            // Flat positions take their protective orders with them
            book.orders.retain(|_, o| o.symbol != symbol);
        }
        book.realized += pnl;
        book.income.push(IncomeRecord {
            symbol: symbol.to_string(),
            income_type: "REALIZED_PNL".to_string(),
            amount: pnl,
            time: at,
        });
        pnl
    }

    fn fill_market(&self, book: &mut Book, request: &OrderRequest, price: Price) -> ExchangeResult<Quantity> {
        let now = self.clock.now();
        let symbol = request.symbol.as_str();
        let existing = book.positions.get(symbol).cloned();

        match existing {
            Some(position) if position.side.exit_side() == request.side => {
                let filled = request.quantity.min(position.quantity);
                Self::reduce(book, symbol, request.side, filled, price, now);
                let remainder = request.quantity - filled;
                if remainder > Decimal::ZERO && !request.reduce_only {
                    // Flip to the other side
                    let leverage = book.leverage.get(symbol).copied().unwrap_or(1);
                    book.positions.insert(
                        symbol.to_string(),
                        PaperPosition {
                            side: position.side.opposite(),
                            entry_price: price,
                            quantity: remainder,
                            leverage,
                        },
                    );
                    return Ok(request.quantity);
                }
                Ok(filled)
            }
            Some(position) => {
                if request.reduce_only {
                    return Err(ExchangeError::Rejected {
                        symbol: symbol.to_string(),
                        reason: "reduce-only order would increase position".to_string(),
                    });
                }
                let total = position.quantity + request.quantity;
                let entry = (position.entry_price * position.quantity + price * request.quantity) / total;
                book.positions.insert(
                    symbol.to_string(),
                    PaperPosition {
                        entry_price: entry,
                        quantity: total,
                        ..position
                    },
                );
                Ok(request.quantity)
            }
            None => {
                if request.reduce_only {
                    return Err(ExchangeError::Rejected {
                        symbol: symbol.to_string(),
                        reason: "no position to reduce".to_string(),
                    });
                }
                let side = match request.side {
                    Side::Buy => PositionSide::Long,
                    Side::Sell => PositionSide::Short,
                };
                let leverage = book.leverage.get(symbol).copied().unwrap_or(1);
                book.positions.insert(
                    symbol.to_string(),
                    PaperPosition {
                        side,
                        entry_price: price,
                        quantity: request.quantity,
                        leverage,
                    },
                );
                Ok(request.quantity)
            }
        }
    }
}

/// Whether a mark price fires a conditional order
fn crosses(order: &OpenOrder, mark: Price) -> bool {
    let Some(trigger) = order.trigger_price else {
        return false;
    };
    // Sell-side exits protect longs, buy-side exits protect shorts
    match (order.kind, order.side) {
        (OrderKind::StopMarket, Side::Sell) => mark <= trigger,
        (OrderKind::StopMarket, Side::Buy) => mark >= trigger,
        (OrderKind::TakeProfitMarket, Side::Sell) => mark >= trigger,
        (OrderKind::TakeProfitMarket, Side::Buy) => mark <= trigger,
        (OrderKind::Market, _) => false,
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        self.gate(PaperOp::GetPositions).await?;
        let book = self.book.read().await;
        let mut positions: Vec<ExchangePosition> = book
            .positions
            .iter()
            .map(|(symbol, p)| {
                let mark = book.marks.get(symbol).copied().unwrap_or(p.entry_price);
                ExchangePosition {
                    symbol: symbol.clone(),
                    side: p.side,
                    entry_price: p.entry_price,
                    quantity: p.quantity,
                    leverage: p.leverage,
                    mark_price: mark,
                    unrealized_pnl: p.pnl_at(mark, p.quantity),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Price> {
        self.gate(PaperOp::GetMarkPrice).await?;
        self.mark_price(symbol)
            .await
            .ok_or_else(|| ExchangeError::NotFound(format!("no mark price for {}", symbol)))
    }

    async fn place_order(&self, request: OrderRequest) -> ExchangeResult<OrderAck> {
        let op = if request.kind.is_conditional() {
            PaperOp::PlaceConditional
        } else {
            PaperOp::PlaceMarket
        };
        self.gate(op).await?;
        self.check_symbol(&request.symbol).await?;

        if request.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected {
                symbol: request.symbol.clone(),
                reason: format!("invalid quantity {}", request.quantity),
            });
        }

        let mut book = self.book.write().await;
        let order_id = self.next_order_id();

        if request.kind.is_conditional() {
            let trigger = request.trigger_price.ok_or_else(|| ExchangeError::Rejected {
                symbol: request.symbol.clone(),
                reason: "conditional order without trigger price".to_string(),
            })?;
            book.orders.insert(
                order_id.clone(),
                OpenOrder {
                    order_id: order_id.clone(),
                    symbol: request.symbol.clone(),
                    side: request.side,
                    kind: request.kind,
                    quantity: request.quantity,
                    trigger_price: Some(trigger),
                    reduce_only: request.reduce_only,
                },
            );
            book.history.push(request);
            return Ok(OrderAck {
                order_id,
                status: OrderStatus::New,
                filled_qty: Decimal::ZERO,
                avg_price: None,
            });
        }

        let price = book
            .marks
            .get(&request.symbol)
            .copied()
            .ok_or_else(|| ExchangeError::NotFound(format!("no mark price for {}", request.symbol)))?;
        let filled = self.fill_market(&mut book, &request, price)?;
        info!(
            "[PAPER] {} {:?} {} @ {}{}",
            request.symbol,
            request.side,
            filled,
            price,
            if request.reduce_only { " (reduce-only)" } else { "" }
        );
        book.history.push(request);

        Ok(OrderAck {
            order_id,
            status: OrderStatus::Filled,
            filled_qty: filled,
            avg_price: Some(price),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        self.gate(PaperOp::CancelOrder).await?;
        let mut book = self.book.write().await;
        match book.orders.get(order_id) {
            Some(order) if order.symbol == symbol => {
                book.orders.remove(order_id);
                Ok(())
            }
            _ => Err(ExchangeError::NotFound(format!(
                "order {} on {}",
                order_id, symbol
            ))),
        }
    }

    async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>> {
        self.gate(PaperOp::GetOpenOrders).await?;
        let book = self.book.read().await;
        let mut orders: Vec<OpenOrder> = book
            .orders
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(orders)
    }

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo> {
        self.gate(PaperOp::GetAccountInfo).await?;
        let book = self.book.read().await;
        let unrealized: Decimal = book
            .positions
            .iter()
            .map(|(symbol, p)| {
                let mark = book.marks.get(symbol).copied().unwrap_or(p.entry_price);
                p.pnl_at(mark, p.quantity)
            })
            .sum();
        let margin: Decimal = book
            .positions
            .values()
            .map(|p| p.entry_price * p.quantity / Decimal::from(p.leverage.max(1)))
            .sum();
        let total = self.config.starting_balance + book.realized;
        Ok(AccountInfo {
            total_balance: total,
            available_balance: total - margin,
            unrealized_pnl: unrealized,
        })
    }

    async fn get_income_history(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> ExchangeResult<Vec<IncomeRecord>> {
        self.gate(PaperOp::GetIncomeHistory).await?;
        let book = self.book.read().await;
        Ok(book
            .income
            .iter()
            .filter(|r| r.time >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        self.gate(PaperOp::SetLeverage).await?;
        self.check_symbol(symbol).await?;
        if !(1..=125).contains(&leverage) {
            return Err(ExchangeError::Rejected {
                symbol: symbol.to_string(),
                reason: format!("leverage {} out of range", leverage),
            });
        }
        self.book
            .write()
            .await
            .leverage
            .insert(symbol.to_string(), leverage);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_paper(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_clock::ManualClock;

    fn exchange() -> PaperExchange {
        PaperExchange::new(PaperConfig::default(), ManualClock::new(None))
    }

    #[tokio::test]
    async fn test_market_entry_and_close() {
        let ex = exchange();
        ex.set_mark_price("BTCUSDT", dec!(100)).await;
        ex.set_leverage("BTCUSDT", 5).await.unwrap();

        let ack = ex
            .place_order(OrderRequest::market("BTCUSDT", Side::Buy, dec!(2)))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.avg_price, Some(dec!(100)));
        assert_eq!(ex.position("BTCUSDT").await.unwrap().leverage, 5);

        ex.set_mark_price("BTCUSDT", dec!(110)).await;
        ex.place_order(OrderRequest::close("BTCUSDT", PositionSide::Long, dec!(2)))
            .await
            .unwrap();
        assert!(ex.position("BTCUSDT").await.is_none());
        assert_eq!(ex.realized_pnl().await, dec!(20));
    }

    #[tokio::test]
    async fn test_stop_triggers_and_clears_orders() {
        let ex = exchange();
        ex.seed_position("ETHUSDT", PositionSide::Short, dec!(100), dec!(1), 3)
            .await;
        ex.place_order(OrderRequest::protective(
            "ETHUSDT",
            PositionSide::Short,
            OrderKind::StopMarket,
            dec!(1),
            dec!(102),
        ))
        .await
        .unwrap();
        ex.place_order(OrderRequest::protective(
            "ETHUSDT",
            PositionSide::Short,
            OrderKind::TakeProfitMarket,
            dec!(1),
            dec!(95),
        ))
        .await
        .unwrap();

        ex.set_mark_price("ETHUSDT", dec!(101)).await;
        assert!(ex.position("ETHUSDT").await.is_some());

        ex.set_mark_price("ETHUSDT", dec!(103)).await;
        assert!(ex.position("ETHUSDT").await.is_none());
        assert!(ex.resting_orders().await.is_empty());
        assert_eq!(ex.realized_pnl().await, dec!(-3));
    }

    #[tokio::test]
    async fn test_reduce_only_without_position_rejected() {
        let ex = exchange();
        ex.set_mark_price("BTCUSDT", dec!(100)).await;
        let err = ex
            .place_order(OrderRequest::close("BTCUSDT", PositionSide::Long, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let ex = exchange();
        ex.set_mark_price("BTCUSDT", dec!(100)).await;
        ex.inject(PaperOp::GetPositions, Fault::FailNext(1)).await;
        assert!(ex.get_positions().await.is_err());
        assert!(ex.get_positions().await.is_ok());

        ex.reject_symbol("BTCUSDT").await;
        let err = ex
            .place_order(OrderRequest::market("BTCUSDT", Side::Buy, dec!(1)))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_never_answers() {
        let ex = exchange();
        ex.inject(PaperOp::GetAccountInfo, Fault::Hang).await;
        let result =
            tokio::time::timeout(Duration::from_secs(5), ex.get_account_info()).await;
        assert!(result.is_err());
    }
}
