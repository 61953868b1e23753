use async_trait::async_trait;
use log::warn;
use sentinel_ports::{LlmContext, LlmOpinion, LlmProvider, LlmResult};
use std::sync::Arc;
use std::time::Duration;

/// Asks the primary provider, then the fallback if the primary fails.
///
/// Both attempts share one deadline so the pair never exceeds the caller's
/// timeout.
pub struct FallbackLlmProvider {
    primary: Arc<dyn LlmProvider>,
    fallback: Arc<dyn LlmProvider>,
}

impl FallbackLlmProvider {
    pub fn new(primary: Arc<dyn LlmProvider>, fallback: Arc<dyn LlmProvider>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl LlmProvider for FallbackLlmProvider {
    async fn generate_decision(
        &self,
        context: &LlmContext,
        timeout: Duration,
    ) -> LlmResult<LlmOpinion> {
        let started = tokio::time::Instant::now();
        match self.primary.generate_decision(context, timeout).await {
            Ok(opinion) => Ok(opinion),
            Err(e) => {
                let remaining = timeout.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(e);
                }
                warn!(
                    "[DECISION] {} failed for {} ({}), trying {}",
                    self.primary.name(),
                    context.symbol,
                    e,
                    self.fallback.name()
                );
                self.fallback.generate_decision(context, remaining).await
            }
        }
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_sim::ScriptedLlm;
    use rust_decimal_macros::dec;
    use sentinel_core::{Direction, TradingMode};
    use sentinel_ports::LlmError;

    fn context() -> LlmContext {
        LlmContext {
            symbol: "BTCUSDT".to_string(),
            mode: TradingMode::Swing,
            price: dec!(100),
            technical_direction: Direction::Long,
            technical_confidence: 70.0,
            scan_summary: String::new(),
        }
    }

    #[tokio::test]
    async fn test_falls_back_on_primary_error() {
        let primary = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Long, 80.0)));
        primary
            .respond_with(Err(LlmError::Provider {
                provider: "primary".to_string(),
                message: "503".to_string(),
            }))
            .await;
        let fallback = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Short, 65.0)));

        let provider = FallbackLlmProvider::new(primary.clone(), fallback.clone());
        let opinion = provider
            .generate_decision(&context(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(opinion.direction, Direction::Short);
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Long, 80.0)));
        let fallback = Arc::new(ScriptedLlm::new(ScriptedLlm::opinion(Direction::Short, 65.0)));
        let provider = FallbackLlmProvider::new(primary, fallback.clone());
        provider
            .generate_decision(&context(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(fallback.calls(), 0);
    }
}
