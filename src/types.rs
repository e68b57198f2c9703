// src/types.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a derivatives position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Order side that adds exposure in this direction.
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that removes exposure held in this direction.
    pub fn exit_order_side(self) -> OrderSide {
        self.opposite().entry_order_side()
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "Long"),
            Side::Short => write!(f, "Short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

/// How the signal expresses its target size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SizeSpec {
    /// Fraction of net equity in (0, 1].
    Ratio(Decimal),
    /// Explicit contract quantity.
    Contracts(Decimal),
}

/// Stop-loss and take-profit levels attached to exposure-increasing orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Protection {
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl Protection {
    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.take_profit.is_none()
    }
}

/// Validated desired end-state for one symbol. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub side: Side,
    pub leverage: u32,
    pub size: SizeSpec,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    /// Ordered from nearest to furthest from entry.
    pub take_profit: Vec<Decimal>,
}

impl TradingSignal {
    /// Protection attached to exchange orders. Only the nearest take-profit level
    /// is sent; further levels stay with the caller.
    pub fn protection(&self) -> Protection {
        Protection {
            stop_loss: self.stop_loss,
            take_profit: self.take_profit.first().copied(),
        }
    }
}

/// Exchange truth for one symbol. `size` is always a non-negative magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub leverage: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl Position {
    pub fn protection(&self) -> Protection {
        Protection {
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub total_equity: Decimal,
    pub used_margin: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

/// One order submission as the exchange connector receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    pub protection: Protection,
    /// Client order id, reused across retries of the same submission.
    pub client_id: String,
}

/// Successful outcome of a mutating exchange call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExchangeAck {
    Accepted { order_id: Option<String> },
    /// The exchange reported that nothing had to change (e.g. leverage not modified).
    NoChange { reason: String },
}

impl fmt::Display for ExchangeAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeAck::Accepted { order_id: Some(id) } => write!(f, "accepted ({})", id),
            ExchangeAck::Accepted { order_id: None } => write!(f, "accepted"),
            ExchangeAck::NoChange { reason } => write!(f, "no change: {}", reason),
        }
    }
}
