//! Sentinel Strategy
//!
//! Everything between a technical scan and a trade verdict, plus the
//! feedback loop that tunes it:
//! - Decision engine fusing technical and LLM opinions under mode gates
//! - Opinion cache keyed by scan fingerprint
//! - Primary/fallback LLM chaining
//! - Live per-mode configuration
//! - Bounded signal audit log
//! - Adaptive learner producing parameter recommendations
//!
//! ## Architecture
//!
//! ```text
//!  TechnicalScan ──► DecisionEngine ──► Decision ──► SignalLog
//!                        │    ▲
//!                        ▼    │ cache hit
//!                   LlmProvider / LlmCache
//!
//!  TradeResult ──► AdaptiveLearner ──► Recommendation
//!                                          │ apply
//!                                          ▼
//!                                   ModeConfigStore ──► next decide()
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sentinel_strategy::{DecisionEngine, ModeConfigStore};
//!
//! let engine = DecisionEngine::new(Some(llm), clock.clone());
//! let config = store.get(TradingMode::Scalp).await;
//! let decision = engine.decide(&scan, TradingMode::Scalp, &config, true).await;
//! if decision.is_execute() {
//!     // hand off to the ledger
//! }
//! ```

pub mod adaptive;
pub mod decision;
pub mod error;
pub mod fallback;
pub mod fusion;
pub mod llm_cache;
pub mod mode_config;
pub mod signal_log;

// Re-export main types
pub use adaptive::{
    AdaptiveLearner, AgreementPatterns, ApplyAllReport, LearnedOutcome, LearnerConfig, ModeStats,
    Recommendation, RecommendationStatus,
};
pub use decision::{reasons, Decision, DecisionEngine};
pub use error::{Error, Result};
pub use fallback::FallbackLlmProvider;
pub use fusion::{fuse, FusedSignal, Signal, AGREEMENT_BONUS, CONFLICT_PENALTY};
pub use llm_cache::{CacheKey, LlmCache};
pub use mode_config::{ModeConfigStore, ParameterSink};
pub use signal_log::{entry_for, SignalLog, SignalStats, DEFAULT_SIGNAL_LOG_CAPACITY};
