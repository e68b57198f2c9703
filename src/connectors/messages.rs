// src/connectors/messages.rs
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Common wrapper of every Bybit v5 REST response.
/// `result` stays untyped until `retCode` says the call succeeded; error
/// responses carry an empty object there.
#[derive(Debug, Deserialize)]
pub struct BybitEnvelope {
    #[serde(rename = "retCode")]
    pub ret_code: i64,

    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,

    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Deserialize)]
pub struct WalletBalanceResult {
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
pub struct WalletAccount {
    #[serde(rename = "totalAvailableBalance", default)]
    pub total_available_balance: String,

    #[serde(default)]
    pub coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
pub struct WalletCoin {
    pub coin: String,

    #[serde(default)]
    pub equity: String,

    #[serde(rename = "unrealisedPnl", default)]
    pub unrealised_pnl: String,

    #[serde(rename = "totalPositionIM", default)]
    pub total_position_im: String,

    #[serde(rename = "totalOrderIM", default)]
    pub total_order_im: String,
}

#[derive(Debug, Deserialize)]
pub struct PositionListResult {
    #[serde(default)]
    pub list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct OrderCreateResult {
    #[serde(rename = "orderId")]
    pub order_id: String,
}

/// Bybit reports absent numbers as "" rather than omitting them.
pub fn lenient_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw).ok()
}
