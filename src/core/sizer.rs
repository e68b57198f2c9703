// src/core/sizer.rs
use crate::config::ReconcilerConfig;
use crate::error::SizingError;
use crate::types::{Balance, SizeSpec, TradingSignal};
use crate::utils::precision::normalize_quantity;
use rust_decimal::Decimal;
use tracing::warn;

/// Converts an allocation into a contract quantity inside the venue's bounds.
pub struct Sizer {
    min_order_size: Decimal,
    max_order_size: Decimal,
    quantity_step: Decimal,
}

impl Sizer {
    pub fn new(config: &ReconcilerConfig) -> Self {
        Self {
            min_order_size: config.min_order_size,
            max_order_size: config.max_order_size,
            quantity_step: config.quantity_step,
        }
    }

    /// Whether sizing `signal` needs a balance read at all.
    pub fn needs_balance(signal: &TradingSignal) -> bool {
        matches!(signal.size, SizeSpec::Ratio(_))
    }

    /// `entry_price` is the tick-normalized price the entry order will carry.
    pub fn quantity_for(
        &self,
        signal: &TradingSignal,
        entry_price: Decimal,
        balance: Option<&Balance>,
    ) -> Result<Decimal, SizingError> {
        match (signal.size, balance) {
            (SizeSpec::Contracts(qty), _) => self.clamp(qty),
            (SizeSpec::Ratio(ratio), Some(b)) => self.from_equity(
                b.total_equity,
                b.unrealized_pnl,
                ratio,
                signal.leverage,
                entry_price,
            ),
            // no balance means no equity to size against
            (SizeSpec::Ratio(_), None) => Err(SizingError::NonPositive(Decimal::ZERO)),
        }
    }

    /// net_equity = total - unrealized; notional = net_equity * ratio * leverage;
    /// quantity = notional / entry_price.
    pub fn from_equity(
        &self,
        total_equity: Decimal,
        unrealized_pnl: Decimal,
        ratio: Decimal,
        leverage: u32,
        entry_price: Decimal,
    ) -> Result<Decimal, SizingError> {
        if entry_price <= Decimal::ZERO {
            return Err(SizingError::InvalidPrice(entry_price));
        }
        let overflow = || SizingError::Overflow(entry_price);
        let net_equity = total_equity.checked_sub(unrealized_pnl).ok_or_else(overflow)?;
        let notional = net_equity
            .checked_mul(ratio)
            .and_then(|n| n.checked_mul(Decimal::from(leverage)))
            .ok_or_else(overflow)?;
        let raw = notional.checked_div(entry_price).ok_or_else(overflow)?;
        self.clamp(raw)
    }

    /// Clamp to [min, max] and round down to the quantity step. A non-positive
    /// raw quantity is an error, never bumped up to the minimum.
    pub fn clamp(&self, raw: Decimal) -> Result<Decimal, SizingError> {
        if raw <= Decimal::ZERO {
            return Err(SizingError::NonPositive(raw));
        }

        let bounded = raw.max(self.min_order_size).min(self.max_order_size);
        if bounded != raw {
            warn!(
                raw = %raw,
                clamped = %bounded,
                min = %self.min_order_size,
                max = %self.max_order_size,
                "quantity clamped to exchange bounds"
            );
        }

        let quantity = normalize_quantity(bounded, self.quantity_step);
        if quantity < self.min_order_size {
            return Err(SizingError::BelowMinimum {
                quantity,
                min: self.min_order_size,
            });
        }
        if quantity <= Decimal::ZERO {
            return Err(SizingError::NonPositive(quantity));
        }
        Ok(quantity)
    }
}
