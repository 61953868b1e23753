use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading mode - each mode runs its own scan loop with its own limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    UltraFast,
    Scalp,
    Swing,
    Position,
}

impl TradingMode {
    /// All modes in scheduling order
    pub const ALL: [TradingMode; 4] = [
        TradingMode::UltraFast,
        TradingMode::Scalp,
        TradingMode::Swing,
        TradingMode::Position,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::UltraFast => "ultra_fast",
            TradingMode::Scalp => "scalp",
            TradingMode::Swing => "swing",
            TradingMode::Position => "position",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ultra_fast" | "ultrafast" => Ok(TradingMode::UltraFast),
            "scalp" => Ok(TradingMode::Scalp),
            "swing" => Ok(TradingMode::Swing),
            "position" => Ok(TradingMode::Position),
            other => Err(format!("unknown trading mode: {}", other)),
        }
    }
}
