//! Sentinel Risk Governor
//!
//! Per-tenant circuit breaker. Trade outcomes go in, a yes/no answer to
//! "may this tenant open a trade now?" comes out.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Risk Governor                         │
//! │                                                             │
//! │  Closed trades ──► Outcome window (1m / 1h / 24h) ──┐       │
//! │                                                     ▼       │
//! │  Config patch ───► Limits ─────────────────► Trip check     │
//! │                                                     │       │
//! │                CLOSED ──trip──► OPEN ──cooldown──► HALF_OPEN│
//! │                   ▲                ▲                  │     │
//! │                   └──── win ───────┴────── loss ──────┘     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     can_trade() -> TradeGate
//!                              │
//!                              ▼
//!                        Mode schedulers
//! ```
//!
//! Windows are evaluated by outcome timestamp, not arrival order, so late
//! reports from asynchronous close paths land in the right window.

pub mod governor;
pub mod state;

// Re-export main types
pub use governor::RiskGovernor;
pub use state::{BreakerSnapshot, CircuitState, TradeGate, TripReason, WindowTotals};
