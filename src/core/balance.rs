// src/core/balance.rs
use crate::connectors::traits::ExchangeClient;
use crate::error::OrderError;
use crate::types::Balance;
use crate::utils::retry::CallPolicy;
use std::sync::Arc;
use tracing::{debug, warn};

/// Balance Reader: pure read of the quote-asset account state.
pub struct BalanceReader {
    client: Arc<dyn ExchangeClient>,
    asset: String,
    policy: CallPolicy,
}

impl BalanceReader {
    pub fn new(client: Arc<dyn ExchangeClient>, asset: impl Into<String>, policy: CallPolicy) -> Self {
        Self {
            client,
            asset: asset.into(),
            policy,
        }
    }

    pub async fn read(&self) -> Result<Balance, OrderError> {
        let balance = self
            .policy
            .run("fetch_balance", || self.client.fetch_balance(&self.asset))
            .await?;

        if balance.total_equity.is_sign_negative() {
            warn!(asset = %self.asset, equity = %balance.total_equity, "negative account equity");
        }
        debug!(
            asset = %self.asset,
            equity = %balance.total_equity,
            used = %balance.used_margin,
            available = %balance.available_balance,
            upnl = %balance.unrealized_pnl,
            "balance read"
        );
        Ok(balance)
    }
}
