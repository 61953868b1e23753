//! Execution Arbiter
//!
//! One autonomous execution path per account. The legacy single-tenant
//! autopilot and the per-user engine both claim the account here before
//! they start; the first claim wins and the other is refused until the
//! owner lets go.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};
use sentinel_core::UserId;
use sentinel_ports::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    /// Process-wide autopilot from before per-user engines
    Legacy,
    /// Per-user engine owned by the orchestrator
    PerUser,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPath::Legacy => write!(f, "legacy"),
            ExecutionPath::PerUser => write!(f, "per_user"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExecutionArbiter {
    claims: DashMap<UserId, ExecutionPath>,
}

impl ExecutionArbiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the account for `path`.
    ///
    /// Check and insert happen under the map's shard lock, so two racing
    /// claims can never both succeed. Re-claiming by the current owner is
    /// refused as well; owners hold on to the returned guard.
    pub fn claim(self: &Arc<Self>, user_id: &str, path: ExecutionPath) -> EngineResult<ArbiterClaim> {
        match self.claims.entry(user_id.to_string()) {
            Entry::Occupied(held) => {
                let owner = *held.get();
                warn!(
                    "[ARBITER] {} refused for {}: {} path is active",
                    path, user_id, owner
                );
                Err(EngineError::RiskBlocked(format!(
                    "{} execution is already active for {}",
                    owner, user_id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(path);
                debug!("[ARBITER] {} claimed {}", path, user_id);
                Ok(ArbiterClaim {
                    arbiter: self.clone(),
                    user_id: user_id.to_string(),
                    path,
                })
            }
        }
    }

    pub fn holder(&self, user_id: &str) -> Option<ExecutionPath> {
        self.claims.get(user_id).map(|p| *p)
    }

    pub fn claims(&self) -> Vec<(UserId, ExecutionPath)> {
        self.claims
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    fn release(&self, user_id: &str, path: ExecutionPath) {
        self.claims.remove_if(user_id, |_, held| *held == path);
        debug!("[ARBITER] {} released {}", path, user_id);
    }
}

/// Held while a path runs; dropping it releases the account
#[derive(Debug)]
pub struct ArbiterClaim {
    arbiter: Arc<ExecutionArbiter>,
    user_id: UserId,
    path: ExecutionPath,
}

impl ArbiterClaim {
    pub fn path(&self) -> ExecutionPath {
        self.path
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for ArbiterClaim {
    fn drop(&mut self) {
        self.arbiter.release(&self.user_id, self.path);
    }
}
