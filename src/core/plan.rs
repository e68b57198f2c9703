// src/core/plan.rs
//! Pure decision function from (observed position, target) to an ordered plan.
//!
//! | observed                         | case       | steps                                                       |
//! |----------------------------------|------------|-------------------------------------------------------------|
//! | none / size 0                    | Open       | cancel → set leverage → limit entry with SL/TP              |
//! | same side, lev diff < threshold  | Increase   | cancel → limit entry for the delta with SL/TP               |
//! |                                  | Decrease   | reduce-only market for the delta                            |
//! |                                  | Converged  | nothing, or a protection update                             |
//! | same side, lev diff ≥ threshold  | ReLeverage | cancel → market close → confirm flat → set lev → full entry |
//! | opposite side                    | Flip       | cancel → market close → confirm flat → set lev → full entry |
//!
//! Every plan that places an entry order cancels resting orders first, so a
//! leftover from an earlier partly filled entry can never add to the new one.

use crate::config::ReconcilerConfig;
use crate::types::{OrderSide, Position, Protection, Side};
use crate::utils::precision::normalize_quantity;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanStep {
    CancelOpenOrders,
    /// Reduce-only market order for the whole observed position.
    CloseAtMarket { side: OrderSide, quantity: Decimal },
    /// Re-read the position and require it to be flat.
    ConfirmFlat,
    SetLeverage { leverage: u32 },
    OpenLimit {
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        protection: Protection,
    },
    /// Reduce-only market order for part of the position. Carries no protection.
    ReduceAtMarket { side: OrderSide, quantity: Decimal },
    UpdateProtection { protection: Protection },
}

impl PlanStep {
    pub fn action(&self) -> &'static str {
        match self {
            PlanStep::CancelOpenOrders => "cancel_open_orders",
            PlanStep::CloseAtMarket { .. } => "close_at_market",
            PlanStep::ConfirmFlat => "confirm_flat",
            PlanStep::SetLeverage { .. } => "set_leverage",
            PlanStep::OpenLimit { .. } => "open_limit",
            PlanStep::ReduceAtMarket { .. } => "reduce_at_market",
            PlanStep::UpdateProtection { .. } => "update_protection",
        }
    }

    pub fn quantity(&self) -> Option<Decimal> {
        match self {
            PlanStep::CloseAtMarket { quantity, .. }
            | PlanStep::OpenLimit { quantity, .. }
            | PlanStep::ReduceAtMarket { quantity, .. } => Some(*quantity),
            _ => None,
        }
    }

    pub fn price(&self) -> Option<Decimal> {
        match self {
            PlanStep::OpenLimit { price, .. } => Some(*price),
            _ => None,
        }
    }

    pub fn is_reduce_only(&self) -> bool {
        matches!(
            self,
            PlanStep::CloseAtMarket { .. } | PlanStep::ReduceAtMarket { .. }
        )
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::CancelOpenOrders | PlanStep::ConfirmFlat => f.write_str(self.action()),
            PlanStep::CloseAtMarket { side, quantity } | PlanStep::ReduceAtMarket { side, quantity } => {
                write!(f, "{} {} {}", self.action(), side.as_str(), quantity)
            }
            PlanStep::SetLeverage { leverage } => write!(f, "set_leverage {}x", leverage),
            PlanStep::OpenLimit {
                side,
                quantity,
                price,
                ..
            } => write!(f, "open_limit {} {} @ {}", side.as_str(), quantity, price),
            PlanStep::UpdateProtection { protection } => write!(
                f,
                "update_protection sl={:?} tp={:?}",
                protection.stop_loss, protection.take_profit
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanCase {
    Open,
    Increase,
    Decrease,
    Converged,
    ReLeverage,
    Flip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationPlan {
    pub case: PlanCase,
    pub steps: Vec<PlanStep>,
}

/// The sized, normalized end-state a plan converges to.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub side: Side,
    pub leverage: u32,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub protection: Protection,
}

pub fn decide(position: Option<&Position>, target: &Target, config: &ReconcilerConfig) -> ReconciliationPlan {
    let entry = PlanStep::OpenLimit {
        side: target.side.entry_order_side(),
        quantity: target.quantity,
        price: target.entry_price,
        protection: target.protection,
    };

    let position = match position.filter(|p| !p.size.is_zero()) {
        Some(p) => p,
        None => {
            return ReconciliationPlan {
                case: PlanCase::Open,
                steps: vec![
                    PlanStep::CancelOpenOrders,
                    PlanStep::SetLeverage {
                        leverage: target.leverage,
                    },
                    entry,
                ],
            }
        }
    };

    let close_and_reopen = |case| ReconciliationPlan {
        case,
        steps: vec![
            PlanStep::CancelOpenOrders,
            PlanStep::CloseAtMarket {
                side: position.side.exit_order_side(),
                quantity: position.size,
            },
            PlanStep::ConfirmFlat,
            PlanStep::SetLeverage {
                leverage: target.leverage,
            },
            entry.clone(),
        ],
    };

    if position.side != target.side {
        return close_and_reopen(PlanCase::Flip);
    }

    let leverage_diff = (position.leverage - Decimal::from(target.leverage)).abs();
    if leverage_diff >= Decimal::from(config.leverage_threshold) {
        return close_and_reopen(PlanCase::ReLeverage);
    }

    let delta = normalize_quantity((target.quantity - position.size).abs(), config.quantity_step);
    if delta.is_zero() || delta < config.min_adjust_size {
        let steps = if config.sync_protection_when_converged
            && protection_differs(&target.protection, &position.protection())
        {
            vec![PlanStep::UpdateProtection {
                protection: target.protection,
            }]
        } else {
            Vec::new()
        };
        return ReconciliationPlan {
            case: PlanCase::Converged,
            steps,
        };
    }

    if target.quantity > position.size {
        ReconciliationPlan {
            case: PlanCase::Increase,
            steps: vec![
                PlanStep::CancelOpenOrders,
                PlanStep::OpenLimit {
                    side: target.side.entry_order_side(),
                    quantity: delta,
                    price: target.entry_price,
                    protection: target.protection,
                },
            ],
        }
    } else {
        ReconciliationPlan {
            case: PlanCase::Decrease,
            steps: vec![PlanStep::ReduceAtMarket {
                side: position.side.exit_order_side(),
                quantity: delta.min(position.size),
            }],
        }
    }
}

// Only levels the target actually sets are compared; absent ones are left alone.
fn protection_differs(target: &Protection, current: &Protection) -> bool {
    let differs = |want: Option<Decimal>, have: Option<Decimal>| want.is_some() && want != have;
    differs(target.stop_loss, current.stop_loss) || differs(target.take_profit, current.take_profit)
}
