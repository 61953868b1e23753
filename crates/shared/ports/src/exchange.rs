use async_trait::async_trait;
use rust_decimal::Decimal;
use sentinel_core::{PositionSide, Price, Quantity, Side, Symbol, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{EngineResult, ExchangeResult};

/// Open position as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub entry_price: Price,
    /// Absolute size; zero means flat
    pub quantity: Quantity,
    pub leverage: u32,
    pub mark_price: Price,
    pub unrealized_pnl: Decimal,
}

/// Order type understood by the exchange client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    /// Conditional stop, triggers a market order at `trigger_price`
    StopMarket,
    /// Conditional take-profit, triggers a market order at `trigger_price`
    TakeProfitMarket,
}

impl OrderKind {
    /// Algo (trigger-price) order rather than a standing order
    pub fn is_conditional(&self) -> bool {
        !matches!(self, OrderKind::Market)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Quantity,
    pub trigger_price: Option<Price>,
    pub reduce_only: bool,
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<Symbol>, side: Side, quantity: Quantity) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            quantity,
            trigger_price: None,
            reduce_only: false,
            client_order_id: String::new(),
        }
    }

    /// Reduce-only market order closing `quantity` of a position
    pub fn close(symbol: impl Into<Symbol>, position_side: PositionSide, quantity: Quantity) -> Self {
        Self {
            reduce_only: true,
            ..Self::market(symbol, position_side.exit_side(), quantity)
        }
    }

    /// Reduce-only conditional order protecting a position
    pub fn protective(
        symbol: impl Into<Symbol>,
        position_side: PositionSide,
        kind: OrderKind,
        quantity: Quantity,
        trigger_price: Price,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side: position_side.exit_side(),
            kind,
            quantity,
            trigger_price: Some(trigger_price),
            reduce_only: true,
            client_order_id: String::new(),
        }
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Filled,
}

/// Exchange acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_qty: Quantity,
    pub avg_price: Option<Price>,
}

/// Resting order (standing or conditional) on the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Quantity,
    pub trigger_price: Option<Price>,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeRecord {
    pub symbol: Symbol,
    /// `REALIZED_PNL`, `COMMISSION`, `FUNDING_FEE`...
    pub income_type: String,
    pub amount: Decimal,
    pub time: Timestamp,
}

/// Port for a futures exchange account.
///
/// Implementations own protocol details: signing, rate limiting, retries.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>>;

    async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Price>;

    async fn place_order(&self, request: OrderRequest) -> ExchangeResult<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()>;

    /// Resting orders for a symbol, conditional ones included
    async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>>;

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo>;

    async fn get_income_history(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> ExchangeResult<Vec<IncomeRecord>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()>;

    /// Get the client's name/identifier for debugging
    fn name(&self) -> &str {
        "ExchangeClient"
    }

    /// Simulated execution (paper / dry-run)
    fn is_paper(&self) -> bool {
        false
    }
}

/// Builds a tenant's exchange client from its stored credentials
#[async_trait]
pub trait ExchangeClientFactory: Send + Sync {
    async fn create(&self, user_id: &UserId, paper: bool) -> EngineResult<Arc<dyn ExchangeClient>>;
}
