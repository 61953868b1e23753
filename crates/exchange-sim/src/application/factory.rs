use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use sentinel_core::UserId;
use sentinel_ports::{Clock, EngineError, EngineResult, ExchangeClient, ExchangeClientFactory};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::paper::{PaperConfig, PaperExchange};

/// Client factory backed by per-user paper accounts.
///
/// Live clients are whatever the test or host registered with
/// [`PaperClientFactory::register_live`]; asking for a live client for a
/// user without one fails the way a missing API key would.
pub struct PaperClientFactory {
    clock: Arc<dyn Clock>,
    config: PaperConfig,
    paper: DashMap<UserId, Arc<PaperExchange>>,
    live: DashMap<UserId, Arc<dyn ExchangeClient>>,
    failing: DashMap<UserId, String>,
    created: AtomicUsize,
}

impl PaperClientFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(PaperConfig::default(), clock)
    }

    pub fn with_config(config: PaperConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            config,
            paper: DashMap::new(),
            live: DashMap::new(),
            failing: DashMap::new(),
            created: AtomicUsize::new(0),
        }
    }

    /// The user's paper account, created on first use.
    ///
    /// Every client handed out for the same user shares this account, so a
    /// test can steer prices on the exchange an engine is trading against.
    pub fn paper_account(&self, user_id: &str) -> Arc<PaperExchange> {
        self.paper
            .entry(user_id.to_string())
            .or_insert_with(|| {
                let config = PaperConfig {
                    name: format!("paper:{}", user_id),
                    ..self.config.clone()
                };
                Arc::new(PaperExchange::new(config, self.clock.clone()))
            })
            .clone()
    }

    pub fn register_live(&self, user_id: &str, client: Arc<dyn ExchangeClient>) {
        self.live.insert(user_id.to_string(), client);
    }

    /// Make every `create` for this user fail
    pub fn fail_for(&self, user_id: &str, reason: &str) {
        self.failing.insert(user_id.to_string(), reason.to_string());
    }

    pub fn users(&self) -> HashSet<UserId> {
        self.paper.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of successful `create` calls
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeClientFactory for PaperClientFactory {
    async fn create(&self, user_id: &UserId, paper: bool) -> EngineResult<Arc<dyn ExchangeClient>> {
        if let Some(reason) = self.failing.get(user_id) {
            return Err(EngineError::Unavailable(reason.clone()));
        }

        let client: Arc<dyn ExchangeClient> = if paper {
            self.paper_account(user_id)
        } else {
            self.live
                .get(user_id)
                .map(|c| c.clone())
                .ok_or_else(|| {
                    EngineError::Unavailable(format!("no live credentials for {}", user_id))
                })?
        };

        self.created.fetch_add(1, Ordering::SeqCst);
        debug!("[FACTORY] {} client for {} ({})", if paper { "paper" } else { "live" }, user_id, client.name());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_clock::ManualClock;

    #[tokio::test]
    async fn test_paper_clients_share_an_account() {
        let factory = PaperClientFactory::new(ManualClock::new(None));
        let a = factory.create(&"alice".to_string(), true).await.unwrap();
        let b = factory.create(&"alice".to_string(), true).await.unwrap();
        assert!(a.is_paper());
        assert_eq!(a.name(), b.name());
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.users().len(), 1);
    }

    #[tokio::test]
    async fn test_live_without_credentials_is_unavailable() {
        let factory = PaperClientFactory::new(ManualClock::new(None));
        let err = factory.create(&"bob".to_string(), false).await.err().unwrap();
        assert!(matches!(err, EngineError::Unavailable(_)));
        assert_eq!(factory.created(), 0);
    }
}
