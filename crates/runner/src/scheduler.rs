//! Mode Scheduler
//!
//! Four independent scan loops (one per trading mode) plus a health loop,
//! all for one tenant.
//!
//! ```text
//!   every scan_interval, per mode:
//!     candidates ─► scan ─► decide ─► SKIP ─► signal log (rejected)
//!        └──── cancellable on shutdown ────┘
//!                                  └─► EXECUTE ─► mode caps ─► breaker ─► open + protect
//!                                                 └──── runs to completion ────┘
//!
//!   every health_interval:
//!     reconcile closed ─► ROI target booking ─► protection audit
//! ```
//!
//! Every tick runs in its own task, so a panic ends that tick only.

use crate::engine::TenantEngine;
use crate::shutdown::{ShutdownSignal, ShutdownTrigger, StopOutcome, bounded_wait, shutdown_channel};
use log::{debug, error, info, warn};
use sentinel_core::{ModeConfig, SignalStatus, TradingMode};
use sentinel_ports::EngineError;
use sentinel_strategy::{Decision, entry_for};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// What one mode tick did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub scanned: usize,
    /// Decisions that came back SKIP
    pub skipped: usize,
    pub executed: usize,
    /// EXECUTE decisions refused by caps, the breaker or the exchange
    pub blocked: usize,
    /// Shutdown arrived before the tick finished scanning
    pub cancelled: bool,
}

#[derive(Default)]
struct Evaluation {
    scanned: usize,
    skipped: usize,
    approved: Vec<Decision>,
}

/// Running loops of one tenant
pub struct SchedulerHandle {
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every loop and wait up to `limit` for them to drain.
    ///
    /// Loops that miss the limit are left to finish their current tick;
    /// nothing is aborted mid-placement.
    pub async fn stop(self, limit: Duration) -> StopOutcome {
        match self.drain(limit).await {
            None => StopOutcome::Completed,
            Some(_) => StopOutcome::TimedOut,
        }
    }

    /// Like [`stop`](Self::stop), but a timeout hands back a task that
    /// resolves once the remaining loops have finished.
    pub async fn drain(self, limit: Duration) -> Option<JoinHandle<()>> {
        self.trigger.trigger();
        let tasks = self.tasks;
        let mut remaining = tokio::spawn(async move {
            for task in tasks {
                let _ = task.await;
            }
        });
        let outcome = bounded_wait(limit, async {
            let _ = (&mut remaining).await;
        })
        .await;
        match outcome {
            StopOutcome::TimedOut => Some(remaining),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }
}

pub struct ModeScheduler;

impl ModeScheduler {
    /// Start the mode loops and the health loop for `engine`
    pub fn spawn(engine: Arc<TenantEngine>) -> SchedulerHandle {
        let (trigger, signal) = shutdown_channel();

        let mut tasks: Vec<JoinHandle<()>> = TradingMode::ALL
            .iter()
            .map(|mode| tokio::spawn(mode_loop(engine.clone(), *mode, signal.clone())))
            .collect();
        tasks.push(tokio::spawn(health_loop(engine.clone(), signal)));

        info!(
            "[{}] scheduler started ({} mode loops)",
            engine.user_id(),
            TradingMode::ALL.len()
        );
        SchedulerHandle { trigger, tasks }
    }

    /// One scan-decide-execute pass for a mode
    pub async fn run_tick(
        engine: &TenantEngine,
        mode: TradingMode,
        shutdown: &ShutdownSignal,
    ) -> TickReport {
        let config = engine.mode_config(mode).await;
        if !config.enabled {
            return TickReport::default();
        }

        let evaluation = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("[{}:{}] tick cancelled while scanning", engine.user_id(), mode);
                return TickReport {
                    cancelled: true,
                    ..Default::default()
                };
            }
            evaluation = evaluate(engine, mode, &config) => evaluation,
        };

        let mut report = TickReport {
            scanned: evaluation.scanned,
            skipped: evaluation.skipped,
            ..Default::default()
        };
        for decision in evaluation.approved {
            if execute(engine, &decision, &config, shutdown).await {
                report.executed += 1;
            } else {
                report.blocked += 1;
            }
        }
        report
    }
}

async fn mode_loop(engine: Arc<TenantEngine>, mode: TradingMode, shutdown: ShutdownSignal) {
    debug!("[{}:{}] loop started", engine.user_id(), mode);

    loop {
        let tick = tokio::spawn({
            let engine = engine.clone();
            let shutdown = shutdown.clone();
            async move { ModeScheduler::run_tick(&engine, mode, &shutdown).await }
        });
        match tick.await {
            Ok(report) if report.executed + report.blocked > 0 => {
                info!(
                    "[{}:{}] tick: scanned {}, executed {}, blocked {}",
                    engine.user_id(),
                    mode,
                    report.scanned,
                    report.executed,
                    report.blocked
                );
            }
            Ok(_) => {}
            Err(e) if e.is_panic() => {
                error!("[{}:{}] tick panicked, loop continues", engine.user_id(), mode);
            }
            Err(e) => warn!("[{}:{}] tick aborted: {}", engine.user_id(), mode, e),
        }

        let interval = engine.mode_config(mode).await.scan_interval();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("[{}:{}] loop stopped", engine.user_id(), mode);
}

async fn health_loop(engine: Arc<TenantEngine>, shutdown: ShutdownSignal) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(engine.health_interval()) => {}
        }

        let check = tokio::spawn({
            let engine = engine.clone();
            async move { engine.health_check().await }
        });
        match check.await {
            Ok(report) => {
                if report.reconciled + report.roi_closed > 0 {
                    info!(
                        "[{}] health: {} closed on exchange, {} at ROI target",
                        engine.user_id(),
                        report.reconciled,
                        report.roi_closed
                    );
                }
                for failure in &report.errors {
                    warn!("[{}] health: {}: {}", engine.user_id(), failure.key, failure.message);
                }
            }
            Err(e) if e.is_panic() => {
                error!("[{}] health check panicked, loop continues", engine.user_id());
            }
            Err(e) => warn!("[{}] health check aborted: {}", engine.user_id(), e),
        }
    }
}

async fn evaluate(engine: &TenantEngine, mode: TradingMode, config: &ModeConfig) -> Evaluation {
    let mut evaluation = Evaluation::default();

    let candidates = match engine.scanner().candidates(mode).await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("[{}:{}] no candidates this tick: {}", engine.user_id(), mode, e);
            return evaluation;
        }
    };

    for symbol in candidates {
        if engine.ledger().contains(&symbol).await {
            continue;
        }
        let scan = match engine.scanner().scan(&symbol, mode).await {
            Ok(scan) => scan,
            Err(e) => {
                debug!("[{}:{}] scan {} failed: {}", engine.user_id(), mode, symbol, e);
                continue;
            }
        };
        evaluation.scanned += 1;

        let decision = engine
            .decisions()
            .decide(&scan, mode, config, engine.llm_enabled())
            .await;
        if decision.is_execute() {
            evaluation.approved.push(decision);
        } else {
            evaluation.skipped += 1;
            let entry = entry_for(
                &decision,
                SignalStatus::Rejected,
                decision.rejection_reason.clone(),
                engine.clock().now(),
            );
            engine.signal_log().record(entry).await;
        }
    }
    evaluation
}

/// Returns whether a position was opened
async fn execute(
    engine: &TenantEngine,
    decision: &Decision,
    config: &ModeConfig,
    shutdown: &ShutdownSignal,
) -> bool {
    let entry = entry_for(decision, SignalStatus::Pending, None, engine.clock().now());
    let signal_id = entry.id.clone();
    let log = engine.signal_log();
    log.record(entry).await;

    if shutdown.is_shutdown() {
        log.update_status(&signal_id, SignalStatus::Rejected, Some("shutdown".to_string()))
            .await;
        return false;
    }

    match engine.execute(decision, config).await {
        Ok(position) => {
            info!(
                "[{}:{}] opened {:?} {} @ {} ({:.1})",
                engine.user_id(),
                decision.mode,
                position.side,
                position.symbol,
                position.entry_price,
                decision.confidence
            );
            log.update_status(&signal_id, SignalStatus::Executed, None).await;
            true
        }
        Err(e) => {
            let reason = match &e {
                EngineError::RiskBlocked(reason) => reason.clone(),
                other => other.to_string(),
            };
            debug!(
                "[{}:{}] {} not opened: {}",
                engine.user_id(),
                decision.mode,
                decision.symbol,
                reason
            );
            log.update_status(&signal_id, SignalStatus::Rejected, Some(reason))
                .await;
            false
        }
    }
}
