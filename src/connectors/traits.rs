// src/connectors/traits.rs
use crate::error::OrderError;
use crate::types::{Balance, ExchangeAck, OrderRequest, Protection};
use async_trait::async_trait;
use serde_json::Value;

/// Primitive operations of a derivatives venue. Implementations only translate;
/// sequencing, retries and timeouts live in the Order Gateway.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_balance(&self, asset: &str) -> Result<Balance, OrderError>;

    /// Raw position object for `symbol`, `None` if the venue reports nothing.
    /// Field names vary per venue; the Position Reader normalizes them.
    async fn fetch_position_payload(&self, symbol: &str) -> Result<Option<Value>, OrderError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<ExchangeAck, OrderError>;

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<ExchangeAck, OrderError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeAck, OrderError>;

    async fn set_position_protection(
        &self,
        symbol: &str,
        protection: Protection,
    ) -> Result<ExchangeAck, OrderError>;
}
