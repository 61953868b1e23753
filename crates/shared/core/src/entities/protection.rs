use serde::{Deserialize, Serialize};

/// Stop-loss / take-profit coverage of a position on the exchange
///
/// ```text
///   PROTECTED ◄──────► UNPROTECTED ──► HEALING ──► PROTECTED
///                                         │
///                                         └──────► EMERGENCY
/// ```
///
/// `EMERGENCY` is terminal: only closing the position clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionState {
    /// No verified SL/TP on the exchange
    Unprotected,
    /// Re-placement of protective orders in progress
    Healing,
    /// SL/TP verified present on the exchange
    Protected,
    /// Healing failed repeatedly; needs an explicit close
    Emergency,
}

impl ProtectionState {
    /// Whether `next` is a legal successor of this state.
    ///
    /// `Healing -> Healing` is allowed so a retry can be recorded without
    /// leaving the healing state.
    pub fn can_transition_to(&self, next: ProtectionState) -> bool {
        use ProtectionState::*;
        matches!(
            (self, next),
            (Unprotected, Protected)
                | (Protected, Unprotected)
                | (Unprotected, Healing)
                | (Healing, Healing)
                | (Healing, Protected)
                | (Healing, Emergency)
        )
    }

    /// Position has no confirmed protection
    pub fn is_naked(&self) -> bool {
        matches!(self, ProtectionState::Unprotected | ProtectionState::Healing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectionState::Unprotected => "UNPROTECTED",
            ProtectionState::Healing => "HEALING",
            ProtectionState::Protected => "PROTECTED",
            ProtectionState::Emergency => "EMERGENCY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProtectionState::*;

    #[test]
    fn test_no_direct_protected_to_emergency() {
        assert!(!Protected.can_transition_to(Emergency));
        assert!(!Unprotected.can_transition_to(Emergency));
    }

    #[test]
    fn test_healing_resolves_both_ways() {
        assert!(Unprotected.can_transition_to(Healing));
        assert!(Healing.can_transition_to(Protected));
        assert!(Healing.can_transition_to(Emergency));
        assert!(!Healing.can_transition_to(Unprotected));
    }

    #[test]
    fn test_emergency_is_terminal() {
        for next in [Unprotected, Healing, Protected, Emergency] {
            assert!(!Emergency.can_transition_to(next));
        }
    }

    #[test]
    fn test_protected_and_unprotected_flip() {
        assert!(Protected.can_transition_to(Unprotected));
        assert!(Unprotected.can_transition_to(Protected));
    }
}
