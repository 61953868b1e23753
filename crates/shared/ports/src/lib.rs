//! Sentinel Ports
//!
//! Port definitions (traits) for the Sentinel engine.
//! These define the boundaries between the engine and its collaborators:
//! exchange accounts, LLM providers, the market scanner and persistence.
//! The engine depends only on these contracts.

mod clock;
mod error;
mod exchange;
mod llm;
mod scanner;
mod store;

pub use clock::Clock;
pub use error::{
    EngineError, EngineResult, ErrorKind, ExchangeError, ExchangeResult, ItemError, LlmError,
    LlmResult, ScanError, ScanResult, StoreError, StoreResult,
};
pub use exchange::{
    AccountInfo, ExchangeClient, ExchangeClientFactory, ExchangePosition, IncomeRecord, OpenOrder,
    OrderAck, OrderKind, OrderRequest, OrderStatus,
};
pub use llm::{LlmContext, LlmOpinion, LlmProvider};
pub use scanner::MarketScanner;
pub use store::{SettingsRepository, SignalLogStore, TradeHistoryStore};
