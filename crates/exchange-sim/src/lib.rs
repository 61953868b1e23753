//! Paper exchange and scripted collaborators.
//!
//! `PaperExchange` implements the exchange port against an in-memory
//! account: market orders fill at the mark price, conditional SL/TP orders
//! rest until a mark update crosses them. Dry-run tenants trade against it,
//! and tests use its fault injection to exercise timeouts, rejections and
//! partial failures.
//!
//! The scanner, LLM and store implementations are deterministic stand-ins
//! for the collaborators the engine reaches through its ports.

// Application layer
pub mod application;

// Infrastructure layer
pub mod infrastructure;

// Cross-cutting concerns
pub mod model;

// Re-export main types for convenience
pub use application::{PaperClientFactory, PaperConfig, PaperExchange};
pub use infrastructure::{
    MemorySettingsRepository, MemorySignalLogStore, MemoryTradeHistory, ScriptedLlm,
    ScriptedScanner, technical_scan,
};
pub use model::{Fault, PaperOp, PaperPosition};
