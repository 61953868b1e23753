//! Engine configuration
//!
//! Every setting group has a full struct with documented defaults and a
//! patch struct whose fields are all optional. `merge` applies a patch to
//! a copy of the current value and validates the result, so a rejected
//! patch never leaves a half-applied config behind.

mod breaker;
mod error;
mod mode;
mod user;

pub use breaker::{CircuitBreakerConfig, CircuitBreakerPatch};
pub use error::ConfigError;
pub use mode::{
    DivergenceSettings, ModeConfig, ModeConfigPatch, ModeLlmSettings, ModeParameter,
    TrailingSettings,
};
pub use user::{LlmGlobalConfig, UserSettings};
