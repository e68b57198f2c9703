// src/core/gateway.rs
use crate::connectors::traits::ExchangeClient;
use crate::error::{OrderError, OrderErrorKind};
use crate::types::{ExchangeAck, OrderKind, OrderRequest, OrderSide, Protection};
use crate::utils::precision::{normalize_price, normalize_quantity};
use crate::utils::retry::CallPolicy;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Order Gateway: the only place that sends mutating requests to the venue.
///
/// Quantities are floored to the lot step and prices rounded to the tick before
/// submission. Each call runs under the shared [`CallPolicy`]; an order keeps
/// the same client id across its retries so a resend after a lost response is
/// recognised as a duplicate instead of doubling the fill.
///
/// Leverage is not re-read after [`OrderGateway::set_leverage`]: an `Accepted`
/// or `NoChange` ack is the confirmation that the symbol now trades at the
/// requested leverage, and any refusal comes back as an error that stops the plan.
pub struct OrderGateway {
    client: Arc<dyn ExchangeClient>,
    policy: CallPolicy,
    price_tick: Decimal,
    quantity_step: Decimal,
}

impl OrderGateway {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        policy: CallPolicy,
        price_tick: Decimal,
        quantity_step: Decimal,
    ) -> Self {
        Self {
            client,
            policy,
            price_tick,
            quantity_step,
        }
    }

    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<ExchangeAck, OrderError> {
        let ack = self
            .policy
            .run("set_leverage", || self.client.set_leverage(symbol, leverage))
            .await?;
        info!(symbol, leverage, %ack, "leverage set");
        Ok(ack)
    }

    pub async fn cancel_all_open_orders(&self, symbol: &str) -> Result<ExchangeAck, OrderError> {
        let ack = self
            .policy
            .run("cancel_all_open_orders", || self.client.cancel_all_open_orders(symbol))
            .await?;
        info!(symbol, %ack, "open orders cancelled");
        Ok(ack)
    }

    pub async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        reduce_only: bool,
        protection: Protection,
    ) -> Result<ExchangeAck, OrderError> {
        let price = normalize_price(price, self.price_tick);
        if price <= Decimal::ZERO {
            return Err(OrderError::new(
                OrderErrorKind::Rejected,
                format!("limit price {} is not positive after rounding", price),
            ));
        }
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Limit,
            quantity: self.lot(quantity)?,
            price: Some(price),
            reduce_only,
            protection: self.round_protection(protection),
            client_id: Uuid::new_v4().to_string(),
        };
        self.submit(request).await
    }

    /// Market orders may only shrink exposure.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<ExchangeAck, OrderError> {
        if !reduce_only {
            return Err(OrderError::new(
                OrderErrorKind::Rejected,
                "market orders must be reduce-only",
            ));
        }
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Market,
            quantity: self.lot(quantity)?,
            price: None,
            reduce_only,
            protection: Protection::default(),
            client_id: Uuid::new_v4().to_string(),
        };
        self.submit(request).await
    }

    pub async fn set_position_protection(
        &self,
        symbol: &str,
        protection: Protection,
    ) -> Result<ExchangeAck, OrderError> {
        let protection = self.round_protection(protection);
        let ack = self
            .policy
            .run("set_position_protection", || {
                self.client.set_position_protection(symbol, protection)
            })
            .await?;
        info!(symbol, ?protection, %ack, "position protection updated");
        Ok(ack)
    }

    async fn submit(&self, request: OrderRequest) -> Result<ExchangeAck, OrderError> {
        debug!(
            symbol = %request.symbol,
            client_id = %request.client_id,
            side = request.side.as_str(),
            qty = %request.quantity,
            price = ?request.price,
            reduce_only = request.reduce_only,
            "submitting order"
        );
        let ack = self
            .policy
            .run("place_order", || self.client.place_order(&request))
            .await?;
        info!(
            "✅ {:?} {} {} {} @ {:?}: {}",
            request.kind,
            request.side.as_str(),
            request.quantity,
            request.symbol,
            request.price,
            ack
        );
        Ok(ack)
    }

    fn lot(&self, quantity: Decimal) -> Result<Decimal, OrderError> {
        let normalized = normalize_quantity(quantity, self.quantity_step);
        if normalized <= Decimal::ZERO {
            return Err(OrderError::new(
                OrderErrorKind::MinNotional,
                format!(
                    "quantity {} rounds to zero with step {}",
                    quantity, self.quantity_step
                ),
            ));
        }
        Ok(normalized)
    }

    fn round_protection(&self, protection: Protection) -> Protection {
        Protection {
            stop_loss: protection.stop_loss.map(|p| normalize_price(p, self.price_tick)),
            take_profit: protection.take_profit.map(|p| normalize_price(p, self.price_tick)),
        }
    }
}
