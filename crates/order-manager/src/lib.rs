//! Sentinel Order Manager
//!
//! Everything between an approved decision and the exchange, for one tenant:
//! - **Execution Venue**: the tenant's exchange client, timeouts on every call,
//!   swap-safe placement sessions
//! - **Position Ledger**: tracked positions, opening/closing, exchange sync
//! - **Protection Supervisor**: SL/TP coverage audit and self-healing
//! - **SL/TP Calculator**: ATR-based levels per mode
//! - **Job Queue**: background bulk work with pollable progress
//!
//! ## Architecture
//!
//! ```text
//! Scheduler ──► OpenRequest ──► ┌──────────────────────────────────────────┐
//!                               │              Order Manager               │
//!                               │  ┌────────────────────────────────────┐  │
//!                               │  │  Position Ledger                   │  │
//!                               │  │  - one entry per symbol            │  │
//!                               │  │  - force sync / reconcile closed   │  │
//!                               │  └───────────────┬────────────────────┘  │
//!                               │                  │ UNPROTECTED entry     │
//!                               │  ┌───────────────▼────────────────────┐  │
//!                               │  │  Protection Supervisor             │  │
//!                               │  │  - SL + 4-stage TP ladder          │  │
//!                               │  │  - audit / heal / emergency        │  │
//!                               │  └───────────────┬────────────────────┘  │
//!                               │                  │ Orders                │
//!                               │  ┌───────────────▼────────────────────┐  │
//!                               │  │  Execution Venue (timeouts, guard) │  │
//!                               │  └───────────────┬────────────────────┘  │
//!                               └──────────────────┼───────────────────────┘
//!                                                  ▼
//!                                          ExchangeClient port
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sentinel_order_manager::{ExecutionVenue, OpenRequest, PositionLedger};
//!
//! let venue = Arc::new(ExecutionVenue::new(client, VenueConfig::default()));
//! let ledger = Arc::new(PositionLedger::new("alice", venue.clone(), clock));
//!
//! let placement = venue.placement().await;
//! let request = OpenRequest::from_mode("BTCUSDT", PositionSide::Long, mode, &config);
//! ledger.open_position(&placement, request).await?;
//! supervisor.protect(&placement, "BTCUSDT").await?;
//! ```

pub mod error;
pub mod jobs;
pub mod ledger;
pub mod protection;
pub mod roi;
pub mod sltp;
pub mod venue;

// Re-export main types
pub use error::{Error, Result};
pub use jobs::{Job, JobProgress, JobQueue, JobQueueConfig, JobRecord, JobStatus};
pub use ledger::{CloseAllReport, OpenRequest, PositionLedger, SyncReport};
pub use protection::{
    AuditReport, PositionProtection, ProtectionConfig, ProtectionStatus, ProtectionSummary,
    ProtectionSupervisor, RecalcReport,
};
pub use roi::{RoiSource, RoiTarget, resolve_roi_target, target_reached, validate_roi_percent};
pub use sltp::{
    DynamicSlTpConfig, LlmLevels, ModeSlTpProfile, SlTpCalculator, SlTpLevels, VolatilityLevel,
};
pub use venue::{ExecutionVenue, Placement, VenueConfig};
