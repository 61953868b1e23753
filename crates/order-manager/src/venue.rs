//! Execution Venue
//!
//! Owns a tenant's exchange client. Every call is bounded by a timeout so a
//! stalled exchange never stalls the caller indefinitely.
//!
//! Order placement goes through a [`Placement`], which holds the venue's
//! shared guard for its whole lifetime. Swapping the client (paper ↔ live)
//! takes the exclusive guard, so a swap waits for in-flight placements and
//! a placement never straddles two clients.

use log::info;
use rust_decimal::Decimal;
use sentinel_core::{Price, Timestamp};
use sentinel_ports::{
    AccountInfo, ExchangeClient, ExchangeError, ExchangePosition, ExchangeResult, IncomeRecord,
    OpenOrder, OrderAck, OrderRequest,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};

/// Venue configuration
#[derive(Debug, Clone)]
pub struct VenueConfig {
    /// Upper bound for any single exchange call
    pub call_timeout: Duration,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = ExchangeResult<T>>,
) -> ExchangeResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout {
            operation: operation.to_string(),
            after_ms: limit.as_millis() as u64,
        }),
    }
}

pub struct ExecutionVenue {
    client: RwLock<Arc<dyn ExchangeClient>>,
    config: VenueConfig,
}

impl ExecutionVenue {
    pub fn new(client: Arc<dyn ExchangeClient>, config: VenueConfig) -> Self {
        Self {
            client: RwLock::new(client),
            config,
        }
    }

    /// Current client, for read-only queries
    pub async fn client(&self) -> Arc<dyn ExchangeClient> {
        self.client.read().await.clone()
    }

    pub async fn is_paper(&self) -> bool {
        self.client.read().await.is_paper()
    }

    pub async fn client_name(&self) -> String {
        self.client.read().await.name().to_string()
    }

    /// Replace the client once no placement is in flight; returns the old one
    pub async fn swap_client(&self, next: Arc<dyn ExchangeClient>) -> Arc<dyn ExchangeClient> {
        let mut guard = self.client.write().await;
        info!(
            "[VENUE] Swapping exchange client {} -> {}",
            guard.name(),
            next.name()
        );
        std::mem::replace(&mut *guard, next)
    }

    /// Open a placement session. Hold it across every order that must land
    /// on the same client (entry plus protection, close plus cancel).
    ///
    /// Do not open a second placement while holding one; a queued swap would
    /// deadlock the two.
    pub async fn placement(&self) -> Placement<'_> {
        Placement {
            client: self.client.read().await,
            limit: self.config.call_timeout,
        }
    }

    pub async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        let client = self.client().await;
        bounded(self.config.call_timeout, "get_positions", client.get_positions()).await
    }

    pub async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Price> {
        let client = self.client().await;
        bounded(
            self.config.call_timeout,
            "get_mark_price",
            client.get_mark_price(symbol),
        )
        .await
    }

    pub async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>> {
        let client = self.client().await;
        bounded(
            self.config.call_timeout,
            "get_open_orders",
            client.get_open_orders(symbol),
        )
        .await
    }

    pub async fn get_account_info(&self) -> ExchangeResult<AccountInfo> {
        let client = self.client().await;
        bounded(
            self.config.call_timeout,
            "get_account_info",
            client.get_account_info(),
        )
        .await
    }

    pub async fn get_income_history(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> ExchangeResult<Vec<IncomeRecord>> {
        let client = self.client().await;
        bounded(
            self.config.call_timeout,
            "get_income_history",
            client.get_income_history(since, limit),
        )
        .await
    }
}

/// Exclusive-of-swap session on the venue's current client
pub struct Placement<'a> {
    client: RwLockReadGuard<'a, Arc<dyn ExchangeClient>>,
    limit: Duration,
}

impl Placement<'_> {
    pub fn is_paper(&self) -> bool {
        self.client.is_paper()
    }

    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        bounded(
            self.limit,
            "set_leverage",
            self.client.set_leverage(symbol, leverage),
        )
        .await
    }

    pub async fn place_order(&self, request: OrderRequest) -> ExchangeResult<OrderAck> {
        bounded(self.limit, "place_order", self.client.place_order(request)).await
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        bounded(
            self.limit,
            "cancel_order",
            self.client.cancel_order(symbol, order_id),
        )
        .await
    }

    pub async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Price> {
        bounded(
            self.limit,
            "get_mark_price",
            self.client.get_mark_price(symbol),
        )
        .await
    }

    pub async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>> {
        bounded(
            self.limit,
            "get_open_orders",
            self.client.get_open_orders(symbol),
        )
        .await
    }

    /// Market order; returns the fill price (ack price, else mark price)
    pub async fn market_fill(&self, request: OrderRequest) -> ExchangeResult<(OrderAck, Price)> {
        let symbol = request.symbol.clone();
        let ack = self.place_order(request).await?;
        let price = match ack.avg_price {
            Some(p) if p > Decimal::ZERO => p,
            _ => self.get_mark_price(&symbol).await?,
        };
        Ok((ack, price))
    }
}
