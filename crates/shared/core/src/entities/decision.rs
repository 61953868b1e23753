use serde::{Deserialize, Serialize};

use super::PositionSide;

/// Directional opinion of a signal source.
///
/// `Neutral` doubles as the `NONE` action of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    #[serde(alias = "HOLD", alias = "NONE")]
    Neutral,
}

impl Direction {
    /// Two non-neutral directions pointing opposite ways
    pub fn conflicts_with(&self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Long, Direction::Short) | (Direction::Short, Direction::Long)
        )
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Direction::Neutral)
    }

    /// Position side this direction would open, if any
    pub fn position_side(&self) -> Option<PositionSide> {
        match self {
            Direction::Long => Some(PositionSide::Long),
            Direction::Short => Some(PositionSide::Short),
            Direction::Neutral => None,
        }
    }
}

impl From<PositionSide> for Direction {
    fn from(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => Direction::Long,
            PositionSide::Short => Direction::Short,
        }
    }
}

/// Final recommendation of the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Execute,
    Skip,
}

/// Risk level an LLM attaches to its opinion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// How a decision was reached; travels with the position so the learner
/// can attribute the eventual outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub technical_direction: Direction,
    pub technical_confidence: f64,
    pub llm_direction: Option<Direction>,
    pub llm_confidence: Option<f64>,
    pub final_confidence: f64,
    /// Technical and LLM signals pointed the same way (or no LLM opinion)
    pub agreement: bool,
    pub llm_provider: Option<String>,
    pub used_cache: bool,
    pub skipped_llm: bool,
    pub skip_reason: Option<String>,
}

impl DecisionContext {
    /// Context for a purely technical decision
    pub fn technical_only(direction: Direction, confidence: f64) -> Self {
        Self {
            technical_direction: direction,
            technical_confidence: confidence,
            llm_direction: None,
            llm_confidence: None,
            final_confidence: confidence,
            agreement: true,
            llm_provider: None,
            used_cache: false,
            skipped_llm: true,
            skip_reason: None,
        }
    }
}
