//! Technical + LLM confidence fusion

use sentinel_core::Direction;
use serde::{Deserialize, Serialize};

/// Bonus when both sources point the same way
pub const AGREEMENT_BONUS: f64 = 10.0;
/// Penalty when they point opposite ways
pub const CONFLICT_PENALTY: f64 = 15.0;

/// A directional opinion with confidence 0-100
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub confidence: f64,
}

impl Signal {
    pub fn new(direction: Direction, confidence: f64) -> Self {
        Self {
            direction,
            confidence,
        }
    }

    /// Confidence that counts toward a direction; neutral counts nothing
    fn directional_confidence(&self) -> f64 {
        if self.direction.is_neutral() {
            0.0
        } else {
            bounded(self.confidence)
        }
    }
}

/// Clamp to 0-100; non-finite values count as no confidence
fn bounded(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedSignal {
    pub direction: Direction,
    pub confidence: f64,
    /// False only when both sources took opposite sides
    pub agreement: bool,
}

/// Blend the technical signal with an optional LLM signal.
///
/// `base = tech * (1 - w) + llm * w`, then +10 on agreement, -15 on
/// conflict, clamped to 0-100. Without an LLM signal the technical one
/// passes through unchanged.
pub fn fuse(technical: Signal, llm: Option<Signal>, weight: f64) -> FusedSignal {
    let Some(llm) = llm else {
        return FusedSignal {
            direction: technical.direction,
            confidence: bounded(technical.confidence),
            agreement: true,
        };
    };

    let w = if weight.is_finite() { weight.clamp(0.0, 1.0) } else { 0.0 };
    let base = technical.directional_confidence() * (1.0 - w) + llm.directional_confidence() * w;

    let agree = !technical.direction.is_neutral() && technical.direction == llm.direction;
    let conflict = technical.direction.conflicts_with(llm.direction);

    let adjusted = if agree {
        base + AGREEMENT_BONUS
    } else if conflict {
        base - CONFLICT_PENALTY
    } else {
        base
    };

    let direction = if agree {
        technical.direction
    } else if technical.direction.is_neutral() {
        llm.direction
    } else if llm.direction.is_neutral() {
        technical.direction
    } else if llm.directional_confidence() * w > technical.directional_confidence() * (1.0 - w) {
        llm.direction
    } else {
        technical.direction
    };

    FusedSignal {
        direction,
        confidence: bounded(adjusted),
        agreement: !conflict,
    }
}
