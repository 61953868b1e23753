use async_trait::async_trait;
use sentinel_core::{Direction, Price, RiskLevel, Symbol, TradingMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmResult;

/// What the LLM is asked about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmContext {
    pub symbol: Symbol,
    pub mode: TradingMode,
    pub price: Price,
    pub technical_direction: Direction,
    pub technical_confidence: f64,
    /// Human-readable digest of the scan, used as prompt material
    pub scan_summary: String,
}

/// LLM trading opinion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmOpinion {
    pub direction: Direction,
    /// 0-100
    pub confidence: f64,
    pub reasoning: String,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub risk_level: Option<RiskLevel>,
    /// Provider that produced the opinion
    pub provider: String,
}

/// Port for LLM decision providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Produce an opinion; implementations should give up after `timeout`
    async fn generate_decision(
        &self,
        context: &LlmContext,
        timeout: Duration,
    ) -> LlmResult<LlmOpinion>;

    fn name(&self) -> &str {
        "LlmProvider"
    }
}
