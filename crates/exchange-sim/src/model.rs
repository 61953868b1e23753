//! Simulator state and fault-injection types

use rust_decimal::Decimal;
use sentinel_core::{PositionSide, Price, Quantity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Exchange operation, as targeted by fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaperOp {
    GetPositions,
    GetMarkPrice,
    /// Market orders (entries and closes)
    PlaceMarket,
    /// Conditional SL/TP orders
    PlaceConditional,
    CancelOrder,
    GetOpenOrders,
    GetAccountInfo,
    GetIncomeHistory,
    SetLeverage,
}

/// How an operation misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail the next `n` calls, then recover
    FailNext(usize),
    /// Let `n` calls through, then fail every call until cleared
    FailAfter(usize),
    /// Fail every call until cleared
    FailAlways,
    /// Never answer (exercises caller timeouts)
    Hang,
}

#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    pub rejected_symbols: HashSet<String>,
    pub ops: HashMap<PaperOp, Fault>,
}

/// What the plan says about the next call of an op
pub(crate) enum FaultAction {
    Proceed,
    Fail,
    Hang,
}

impl FaultPlan {
    pub fn take(&mut self, op: PaperOp) -> FaultAction {
        match self.ops.get_mut(&op) {
            None => FaultAction::Proceed,
            Some(Fault::Hang) => FaultAction::Hang,
            Some(Fault::FailAlways) => FaultAction::Fail,
            Some(Fault::FailAfter(0)) => FaultAction::Fail,
            Some(Fault::FailAfter(remaining)) => {
                *remaining -= 1;
                FaultAction::Proceed
            }
            Some(Fault::FailNext(remaining)) => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    self.ops.remove(&op);
                }
                FaultAction::Fail
            }
        }
    }
}

/// Position held by the paper account (one-way mode: one per symbol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperPosition {
    pub side: PositionSide,
    pub entry_price: Price,
    pub quantity: Quantity,
    pub leverage: u32,
}

impl PaperPosition {
    pub fn pnl_at(&self, mark: Price, quantity: Quantity) -> Decimal {
        (mark - self.entry_price) * quantity * self.side.sign()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_next_recovers() {
        let mut plan = FaultPlan::default();
        plan.ops.insert(PaperOp::PlaceMarket, Fault::FailNext(2));
        assert!(matches!(plan.take(PaperOp::PlaceMarket), FaultAction::Fail));
        assert!(matches!(plan.take(PaperOp::PlaceMarket), FaultAction::Fail));
        assert!(matches!(plan.take(PaperOp::PlaceMarket), FaultAction::Proceed));
    }

    #[test]
    fn test_fail_always_sticks() {
        let mut plan = FaultPlan::default();
        plan.ops.insert(PaperOp::GetPositions, Fault::FailAlways);
        for _ in 0..5 {
            assert!(matches!(plan.take(PaperOp::GetPositions), FaultAction::Fail));
        }
        assert!(matches!(plan.take(PaperOp::SetLeverage), FaultAction::Proceed));
    }

    #[test]
    fn test_fail_after_lets_calls_through_first() {
        let mut plan = FaultPlan::default();
        plan.ops.insert(PaperOp::PlaceConditional, Fault::FailAfter(1));
        assert!(matches!(plan.take(PaperOp::PlaceConditional), FaultAction::Proceed));
        assert!(matches!(plan.take(PaperOp::PlaceConditional), FaultAction::Fail));
        assert!(matches!(plan.take(PaperOp::PlaceConditional), FaultAction::Fail));
    }
}
