//! Sentinel Runner
//!
//! Multi-tenant autopilot: one isolated engine per user, each with its own
//! exchange client, position ledger, circuit breaker, decision engine and
//! mode loops.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Tenant Orchestrator                         │
//! │                                                                  │
//! │   registry: user ──► slot { lifecycle lock, state, engine }      │
//! │                                                                  │
//! │   start ──► Execution Arbiter (one path per account)             │
//! │               │                                                  │
//! │               ▼                                                  │
//! │   ┌──────────────────── Tenant Engine ─────────────────────┐     │
//! │   │  venue ── ledger ── protection ── jobs                 │     │
//! │   │  governor ── decisions ── learner ── signal log        │     │
//! │   └───────────────────────────┬────────────────────────────┘     │
//! │                               │                                  │
//! │   Mode Scheduler: ULTRA_FAST │ SCALP │ SWING │ POSITION │ health  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = TenantOrchestrator::new(OrchestratorConfig::default(), deps);
//! orchestrator.start_autopilot("alice").await?;
//! let status = orchestrator.get_status("alice").await;
//! orchestrator.stop_autopilot("alice").await;
//! ```

pub mod arbiter;
pub mod engine;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;

// Re-export main types
pub use arbiter::{ArbiterClaim, ExecutionArbiter, ExecutionPath};
pub use engine::{
    Collaborators, EngineConfig, EngineSnapshot, HealthReport, ModeDaily, ModeSummary,
    TenantEngine,
};
pub use orchestrator::{
    BulkReport, EngineState, ManagerStatus, OrchestratorConfig, TenantCounts, TenantOrchestrator,
    TenantStatus,
};
pub use scheduler::{ModeScheduler, SchedulerHandle, TickReport};
pub use shutdown::{ShutdownSignal, ShutdownTrigger, StopOutcome, bounded_wait, shutdown_channel};
