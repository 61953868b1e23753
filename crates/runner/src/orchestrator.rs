//! Tenant Orchestrator
//!
//! Registry of per-user engines. Each user gets a slot whose lifecycle
//! mutex serialises start, stop and client switches for that user only;
//! queries never take it.
//!
//! ```text
//!   start ──► claim account ──► load settings ──► build client ──► engine ──► scheduler
//!               │ refused                            │ failed
//!               ▼                                    ▼
//!          RiskBlocked                         slot = FAILED
//!
//!   STOPPED ──start──► RUNNING ──stop──► STOPPING ──drained──► STOPPED
//! ```
//!
//! A stop that outlasts its bounded wait leaves the slot STOPPING and keeps
//! the account claim until the stragglers finish; starts are refused until
//! then.

use crate::arbiter::{ArbiterClaim, ExecutionArbiter, ExecutionPath};
use crate::engine::{Collaborators, EngineConfig, EngineSnapshot, TenantEngine};
use crate::scheduler::{ModeScheduler, SchedulerHandle};
use crate::shutdown::{ShutdownSignal, ShutdownTrigger, StopOutcome, shutdown_channel};
use dashmap::DashMap;
use log::{error, info, warn};
use sentinel_core::{Position, Timestamp, TradeResult, UserId, UserSettings};
use sentinel_order_manager::{DynamicSlTpConfig, JobQueueConfig, ProtectionConfig, VenueConfig};
use sentinel_ports::{EngineError, EngineResult, ItemError};
use sentinel_strategy::LearnerConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator configuration; loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Bounded wait for a tenant's loops to drain on stop
    pub stop_timeout_ms: u64,
    pub idle_check_interval_secs: u64,
    /// Stopped tenants idle longer than this are dropped from the registry
    pub idle_timeout_secs: u64,
    pub health_interval_secs: u64,
    pub exchange_timeout_ms: u64,
    pub max_heal_attempts: u32,
    pub job_workers: usize,
    pub job_history: usize,
    pub job_timeout_secs: u64,
    pub signal_log_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5_000,
            idle_check_interval_secs: 300,
            idle_timeout_secs: 1_800,
            health_interval_secs: 30,
            exchange_timeout_ms: 10_000,
            max_heal_attempts: 3,
            job_workers: 2,
            job_history: 100,
            job_timeout_secs: 600,
            signal_log_capacity: sentinel_strategy::DEFAULT_SIGNAL_LOG_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Validation(format!("orchestrator config: {}", e)))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_timeout_secs as i64)
    }

    /// Component configs for each tenant's bundle
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            venue: VenueConfig {
                call_timeout: Duration::from_millis(self.exchange_timeout_ms),
            },
            protection: ProtectionConfig {
                max_heal_attempts: self.max_heal_attempts,
            },
            sltp: DynamicSlTpConfig::default(),
            jobs: JobQueueConfig {
                workers: self.job_workers,
                history_limit: self.job_history,
                job_timeout: Duration::from_secs(self.job_timeout_secs),
            },
            learner: LearnerConfig::default(),
            signal_log_capacity: self.signal_log_capacity,
            health_interval: Duration::from_secs(self.health_interval_secs),
        }
    }
}

// ============================================================================
// Status types
// ============================================================================

/// Authoritative per-tenant status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Running,
    Stopping,
    Failed,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantStatus {
    pub user_id: UserId,
    pub running: bool,
    pub state: EngineState,
    pub last_error: Option<String>,
    pub created_at: Option<Timestamp>,
    pub last_active: Option<Timestamp>,
    /// Absent until an engine has been built for the user
    pub engine: Option<EngineSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCounts {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub counts: TenantCounts,
    pub running_users: Vec<UserId>,
    pub claims: Vec<(UserId, ExecutionPath)>,
    pub config: OrchestratorConfig,
}

/// Result of a bulk start or stop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkReport {
    pub succeeded: usize,
    pub errors: Vec<ItemError>,
}

// ============================================================================
// Slots
// ============================================================================

/// Owned by the lifecycle mutex
#[derive(Default)]
struct Lifecycle {
    scheduler: Option<SchedulerHandle>,
    claim: Option<ArbiterClaim>,
    /// Loops of a timed-out stop; holds the claim until they finish
    draining: Option<JoinHandle<()>>,
}

struct TenantSlot {
    user_id: UserId,
    lifecycle: Mutex<Lifecycle>,
    state: RwLock<EngineState>,
    last_error: RwLock<Option<String>>,
    engine: RwLock<Option<Arc<TenantEngine>>>,
    last_active: RwLock<Timestamp>,
}

impl TenantSlot {
    fn new(user_id: &str, now: Timestamp) -> Self {
        Self {
            user_id: user_id.to_string(),
            lifecycle: Mutex::new(Lifecycle::default()),
            state: RwLock::new(EngineState::Stopped),
            last_error: RwLock::new(None),
            engine: RwLock::new(None),
            last_active: RwLock::new(now),
        }
    }

    async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    async fn set_state(&self, state: EngineState) {
        *self.state.write().await = state;
    }

    async fn engine(&self) -> Option<Arc<TenantEngine>> {
        self.engine.read().await.clone()
    }

    async fn touch(&self, now: Timestamp) {
        *self.last_active.write().await = now;
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct TenantOrchestrator {
    config: OrchestratorConfig,
    deps: Collaborators,
    arbiter: Arc<ExecutionArbiter>,
    tenants: DashMap<UserId, Arc<TenantSlot>>,
    background: Mutex<Option<(ShutdownTrigger, JoinHandle<()>)>>,
}

impl TenantOrchestrator {
    pub fn new(config: OrchestratorConfig, deps: Collaborators) -> Arc<Self> {
        Self::with_arbiter(config, deps, ExecutionArbiter::new())
    }

    /// Share an arbiter with the legacy autopilot
    pub fn with_arbiter(
        config: OrchestratorConfig,
        deps: Collaborators,
        arbiter: Arc<ExecutionArbiter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            deps,
            arbiter,
            tenants: DashMap::new(),
            background: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn arbiter(&self) -> &Arc<ExecutionArbiter> {
        &self.arbiter
    }

    fn slot(&self, user_id: &str) -> Arc<TenantSlot> {
        let now = self.deps.clock.now();
        self.tenants
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(TenantSlot::new(user_id, now)))
            .clone()
    }

    fn existing(&self, user_id: &str) -> Option<Arc<TenantSlot>> {
        self.tenants.get(user_id).map(|s| s.clone())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the user's engine. Idempotent: a running engine is left as is.
    pub async fn start_autopilot(&self, user_id: &str) -> EngineResult<TenantStatus> {
        let slot = self.slot(user_id);
        slot.touch(self.deps.clock.now()).await;
        {
            let mut lifecycle = slot.lifecycle.lock().await;
            self.start_locked(&slot, &mut lifecycle).await?;
        }
        Ok(self.status_of(&slot).await)
    }

    async fn start_locked(&self, slot: &TenantSlot, lifecycle: &mut Lifecycle) -> EngineResult<()> {
        if lifecycle.scheduler.is_some() && slot.state().await == EngineState::Running {
            return Ok(());
        }
        if let Some(draining) = &lifecycle.draining {
            if !draining.is_finished() {
                return Err(EngineError::RiskBlocked(format!(
                    "{} is still draining its previous run",
                    slot.user_id
                )));
            }
            lifecycle.draining = None;
        }

        let claim = self.arbiter.claim(&slot.user_id, ExecutionPath::PerUser)?;

        let engine = match slot.engine().await {
            Some(engine) => engine,
            None => match self.build_engine(&slot.user_id).await {
                Ok(engine) => {
                    let engine = Arc::new(engine);
                    *slot.engine.write().await = Some(engine.clone());
                    engine
                }
                Err(e) => {
                    error!("[ORCH] {} failed to start: {}", slot.user_id, e);
                    *slot.last_error.write().await = Some(e.to_string());
                    slot.set_state(EngineState::Failed).await;
                    return Err(e);
                }
            },
        };

        lifecycle.scheduler = Some(ModeScheduler::spawn(engine));
        lifecycle.claim = Some(claim);
        *slot.last_error.write().await = None;
        slot.set_state(EngineState::Running).await;
        info!("[ORCH] {} autopilot started", slot.user_id);
        Ok(())
    }

    async fn build_engine(&self, user_id: &str) -> EngineResult<TenantEngine> {
        let user_key = user_id.to_string();
        let settings = self
            .deps
            .settings
            .load_user_settings(&user_key)
            .await?
            .unwrap_or_default();
        for config in settings.modes.values() {
            config.validate()?;
        }

        let client = self.deps.factory.create(&user_key, settings.dry_run).await?;
        Ok(TenantEngine::new(
            user_key,
            &settings,
            client,
            &self.deps,
            &self.config.engine_config(),
        ))
    }

    /// Stop the user's loops with a bounded wait. The engine stays in the
    /// registry (positions, breaker and learner state intact) until idle
    /// cleanup removes it.
    pub async fn stop_autopilot(&self, user_id: &str) -> StopOutcome {
        let Some(slot) = self.existing(user_id) else {
            return StopOutcome::NotRunning;
        };
        slot.touch(self.deps.clock.now()).await;
        let mut lifecycle = slot.lifecycle.lock().await;
        self.stop_locked(&slot, &mut lifecycle).await
    }

    async fn stop_locked(&self, slot: &Arc<TenantSlot>, lifecycle: &mut Lifecycle) -> StopOutcome {
        let Some(scheduler) = lifecycle.scheduler.take() else {
            return StopOutcome::NotRunning;
        };

        slot.set_state(EngineState::Stopping).await;
        let Some(remaining) = scheduler.drain(self.config.stop_timeout()).await else {
            lifecycle.claim = None;
            slot.set_state(EngineState::Stopped).await;
            info!("[ORCH] {} autopilot stopped", slot.user_id);
            return StopOutcome::Completed;
        };

        warn!(
            "[ORCH] {} loops still draining after {:?}, account stays claimed",
            slot.user_id,
            self.config.stop_timeout()
        );
        let claim = lifecycle.claim.take();
        let slot = slot.clone();
        lifecycle.draining = Some(tokio::spawn(async move {
            let _ = remaining.await;
            drop(claim);
            slot.set_state(EngineState::Stopped).await;
            info!("[ORCH] {} drained, autopilot stopped", slot.user_id);
        }));
        StopOutcome::TimedOut
    }

    /// Switch between paper and live execution.
    ///
    /// A running engine is stopped first (bounded wait), the client is
    /// swapped under the venue's exclusive guard, tracked positions are
    /// re-synced from the new venue, and the engine restarts if it was
    /// running and `restart` is set.
    pub async fn set_dry_run(
        &self,
        user_id: &str,
        dry_run: bool,
        restart: bool,
    ) -> EngineResult<TenantStatus> {
        let slot = self
            .existing(user_id)
            .ok_or_else(|| EngineError::Unavailable(format!("no engine for {}", user_id)))?;
        slot.touch(self.deps.clock.now()).await;
        let engine = slot
            .engine()
            .await
            .ok_or_else(|| EngineError::Unavailable(format!("no engine for {}", user_id)))?;

        {
            let mut lifecycle = slot.lifecycle.lock().await;
            let was_running = lifecycle.scheduler.is_some();
            self.stop_locked(&slot, &mut lifecycle).await;

            let user_key = user_id.to_string();
            let client = self.deps.factory.create(&user_key, dry_run).await?;
            engine.venue().swap_client(client).await;
            engine.set_dry_run(dry_run);
            info!(
                "[ORCH] {} switched to {} trading",
                user_id,
                if dry_run { "paper" } else { "live" }
            );

            match engine.force_sync().await {
                Ok(report) if !report.errors.is_empty() => warn!(
                    "[ORCH] {} resync after switch: {} reconciled, {} error(s)",
                    user_id,
                    report.reconciled,
                    report.errors.len()
                ),
                Ok(_) => {}
                Err(e) => warn!("[ORCH] {} resync after switch failed: {}", user_id, e),
            }

            self.persist_dry_run(&user_key, dry_run).await;

            if was_running && restart {
                self.start_locked(&slot, &mut lifecycle).await?;
            }
        }
        Ok(self.status_of(&slot).await)
    }

    async fn persist_dry_run(&self, user_id: &UserId, dry_run: bool) {
        let repo = &self.deps.settings;
        let mut settings = match repo.load_user_settings(user_id).await {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                warn!("[ORCH] {} settings not loaded, dry-run flag not saved: {}", user_id, e);
                return;
            }
        };
        settings.dry_run = dry_run;
        if let Err(e) = repo.save_user_settings(user_id, &settings).await {
            warn!("[ORCH] {} dry-run flag not saved: {}", user_id, e);
        }
    }

    /// Rebuild the exchange client after credentials changed
    pub async fn refresh_client(&self, user_id: &str) -> EngineResult<()> {
        let slot = self
            .existing(user_id)
            .ok_or_else(|| EngineError::Unavailable(format!("no engine for {}", user_id)))?;
        let engine = slot
            .engine()
            .await
            .ok_or_else(|| EngineError::Unavailable(format!("no engine for {}", user_id)))?;

        let _lifecycle = slot.lifecycle.lock().await;
        let client = self
            .deps
            .factory
            .create(&user_id.to_string(), engine.is_dry_run())
            .await?;
        engine.venue().swap_client(client).await;
        slot.touch(self.deps.clock.now()).await;
        info!("[ORCH] {} exchange client refreshed", user_id);
        Ok(())
    }

    /// Start every user whose settings ask for it
    pub async fn auto_start_from_settings(&self) -> EngineResult<BulkReport> {
        let users = self.deps.settings.auto_start_users().await?;
        let mut report = BulkReport::default();
        for user_id in users {
            match self.start_autopilot(&user_id).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => report.errors.push(ItemError::new(user_id, e)),
            }
        }
        info!(
            "[ORCH] auto-start: {} started, {} failed",
            report.succeeded,
            report.errors.len()
        );
        Ok(report)
    }

    /// Stop every running tenant; returns how many were stopped
    pub async fn shutdown_all(&self) -> usize {
        if let Some((trigger, task)) = self.background.lock().await.take() {
            trigger.trigger();
            let _ = task.await;
        }

        let slots: Vec<Arc<TenantSlot>> = self.tenants.iter().map(|e| e.value().clone()).collect();
        let mut stopped = 0;
        for slot in slots {
            let mut lifecycle = slot.lifecycle.lock().await;
            if self.stop_locked(&slot, &mut lifecycle).await != StopOutcome::NotRunning {
                stopped += 1;
            }
        }
        info!("[ORCH] shutdown: {} tenant(s) stopped", stopped);
        stopped
    }

    // ========================================================================
    // Idle cleanup
    // ========================================================================

    /// Drop tenants that are not running and have been idle too long
    pub async fn cleanup_idle(&self) -> usize {
        let now = self.deps.clock.now();
        let limit = self.config.idle_timeout();
        let slots: Vec<Arc<TenantSlot>> = self.tenants.iter().map(|e| e.value().clone()).collect();

        let mut removed = 0;
        for slot in slots {
            // A slot mid-start or mid-switch is busy, not idle
            let Ok(lifecycle) = slot.lifecycle.try_lock() else {
                continue;
            };
            let state = slot.state().await;
            if lifecycle.scheduler.is_some()
                || matches!(state, EngineState::Running | EngineState::Stopping)
            {
                continue;
            }
            if now - *slot.last_active.read().await <= limit {
                continue;
            }

            self.tenants.remove(&slot.user_id);
            if let Some(engine) = slot.engine.write().await.take() {
                engine.shutdown_jobs().await;
            }
            removed += 1;
            info!("[ORCH] {} removed after idle timeout", slot.user_id);
        }
        removed
    }

    /// Run [`Self::cleanup_idle`] periodically until `shutdown_all`
    pub async fn start_idle_cleanup(self: &Arc<Self>) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return;
        }
        let (trigger, signal) = shutdown_channel();
        let task = tokio::spawn(idle_cleanup_loop(Arc::downgrade(self), signal));
        *background = Some((trigger, task));
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn is_running(&self, user_id: &str) -> bool {
        match self.existing(user_id) {
            Some(slot) => slot.state().await == EngineState::Running,
            None => false,
        }
    }

    pub async fn get_status(&self, user_id: &str) -> TenantStatus {
        match self.existing(user_id) {
            Some(slot) => self.status_of(&slot).await,
            None => TenantStatus {
                user_id: user_id.to_string(),
                running: false,
                state: EngineState::Stopped,
                last_error: None,
                created_at: None,
                last_active: None,
                engine: None,
            },
        }
    }

    async fn status_of(&self, slot: &TenantSlot) -> TenantStatus {
        let state = slot.state().await;
        let engine = slot.engine().await;
        let snapshot = match &engine {
            Some(engine) => Some(engine.snapshot().await),
            None => None,
        };
        TenantStatus {
            user_id: slot.user_id.clone(),
            running: state == EngineState::Running,
            state,
            last_error: slot.last_error.read().await.clone(),
            created_at: engine.as_ref().map(|e| e.created_at()),
            last_active: Some(*slot.last_active.read().await),
            engine: snapshot,
        }
    }

    /// Engine accessor for mutation endpoints (config, recommendations,
    /// force sync, close all, SL/TP recalculation, custom ROI, breaker)
    pub async fn engine(&self, user_id: &str) -> EngineResult<Arc<TenantEngine>> {
        let slot = self
            .existing(user_id)
            .ok_or_else(|| EngineError::Unavailable(format!("no engine for {}", user_id)))?;
        slot.touch(self.deps.clock.now()).await;
        slot.engine()
            .await
            .ok_or_else(|| EngineError::Unavailable(format!("no engine for {}", user_id)))
    }

    pub async fn get_positions(&self, user_id: &str) -> EngineResult<Vec<Position>> {
        Ok(self.engine(user_id).await?.positions().await)
    }

    pub async fn get_trade_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> EngineResult<Vec<TradeResult>> {
        self.engine(user_id).await?.trade_history(limit).await
    }

    pub async fn running_users(&self) -> Vec<UserId> {
        let slots: Vec<Arc<TenantSlot>> = self.tenants.iter().map(|e| e.value().clone()).collect();
        let mut running = Vec::new();
        for slot in slots {
            if slot.state().await == EngineState::Running {
                running.push(slot.user_id.clone());
            }
        }
        running.sort();
        running
    }

    pub async fn counts(&self) -> TenantCounts {
        let slots: Vec<Arc<TenantSlot>> = self.tenants.iter().map(|e| e.value().clone()).collect();
        let mut counts = TenantCounts {
            total: slots.len(),
            ..Default::default()
        };
        for slot in slots {
            match slot.state().await {
                EngineState::Running => counts.running += 1,
                EngineState::Failed => counts.failed += 1,
                EngineState::Stopped | EngineState::Stopping => counts.stopped += 1,
            }
        }
        counts
    }

    pub async fn manager_status(&self) -> ManagerStatus {
        ManagerStatus {
            counts: self.counts().await,
            running_users: self.running_users().await,
            claims: self.arbiter.claims(),
            config: self.config.clone(),
        }
    }

    /// Settings an engine for `user_id` would start with
    pub async fn load_settings(&self, user_id: &str) -> EngineResult<UserSettings> {
        Ok(self
            .deps
            .settings
            .load_user_settings(&user_id.to_string())
            .await?
            .unwrap_or_default())
    }
}

async fn idle_cleanup_loop(orchestrator: std::sync::Weak<TenantOrchestrator>, shutdown: ShutdownSignal) {
    loop {
        let interval = match orchestrator.upgrade() {
            Some(orchestrator) => orchestrator.config.idle_check_interval(),
            None => break,
        };
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        let removed = orchestrator.cleanup_idle().await;
        if removed > 0 {
            info!("[ORCH] idle cleanup removed {} tenant(s)", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_partial_json() {
        let config = OrchestratorConfig::from_json(r#"{"stop_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.stop_timeout(), Duration::from_millis(250));
        assert_eq!(config.idle_timeout_secs, 1_800);

        let engine = config.engine_config();
        assert_eq!(engine.venue.call_timeout, Duration::from_secs(10));
        assert_eq!(engine.health_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_config_rejects_bad_json() {
        let err = OrchestratorConfig::from_json("{\"stop_timeout_ms\": \"soon\"}").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
