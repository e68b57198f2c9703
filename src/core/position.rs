// src/core/position.rs
//! Position Reader: one canonical parse of whatever the venue calls its fields.
//!
//! Field precedence (first present, non-empty field wins):
//!
//! | value        | fields                                            |
//! |--------------|---------------------------------------------------|
//! | size         | `size`, `contracts`, `positionAmt`, `qty`         |
//! | side         | `side`, else the sign of the size field           |
//! | entry price  | `avgPrice`, `entryPrice`, `entry_price`           |
//! | mark price   | `markPrice`, `mark_price`                         |
//! | unrealized   | `unrealisedPnl`, `unrealizedPnl`, `unRealizedProfit` |
//! | liquidation  | `liqPrice`, `liquidationPrice`                    |
//! | leverage     | `leverage` (required for an open position)        |
//!
//! A size of zero is reported as `None`, the same as a missing position.

use crate::connectors::traits::ExchangeClient;
use crate::error::{OrderError, OrderErrorKind};
use crate::types::{Position, Side};
use crate::utils::retry::CallPolicy;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const SIZE_FIELDS: &[&str] = &["size", "contracts", "positionAmt", "qty"];
const ENTRY_FIELDS: &[&str] = &["avgPrice", "entryPrice", "entry_price"];
const MARK_FIELDS: &[&str] = &["markPrice", "mark_price"];
const PNL_FIELDS: &[&str] = &["unrealisedPnl", "unrealizedPnl", "unRealizedProfit"];
const LIQ_FIELDS: &[&str] = &["liqPrice", "liquidationPrice"];

pub struct PositionReader {
    client: Arc<dyn ExchangeClient>,
    policy: CallPolicy,
}

impl PositionReader {
    pub fn new(client: Arc<dyn ExchangeClient>, policy: CallPolicy) -> Self {
        Self { client, policy }
    }

    /// Fresh read from the venue; never cached.
    pub async fn read(&self, symbol: &str) -> Result<Option<Position>, OrderError> {
        let payload = self
            .policy
            .run("fetch_position", || self.client.fetch_position_payload(symbol))
            .await?;

        let position = match payload {
            Some(raw) => parse_position(symbol, &raw)?,
            None => None,
        };
        debug!(symbol, ?position, "position read");
        Ok(position)
    }
}

pub fn parse_position(symbol: &str, raw: &Value) -> Result<Option<Position>, OrderError> {
    let signed_size = match first_decimal(raw, SIZE_FIELDS)? {
        Some(size) => size,
        None => return Ok(None),
    };
    if signed_size.is_zero() {
        return Ok(None);
    }

    let side = match raw.get("side").and_then(Value::as_str).map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("buy") || s.eq_ignore_ascii_case("long") => Side::Long,
        Some(s) if s.eq_ignore_ascii_case("sell") || s.eq_ignore_ascii_case("short") => {
            Side::Short
        }
        // one-way venues encode direction in the sign
        _ if signed_size.is_sign_negative() => Side::Short,
        Some(s) if !s.is_empty() && !s.eq_ignore_ascii_case("none") => {
            return Err(decode(format!("unknown position side `{}`", s)));
        }
        _ => Side::Long,
    };

    // the leverage decision needs the real value, a default would force a re-leverage
    let leverage = first_decimal(raw, &["leverage"])?
        .ok_or_else(|| decode(format!("open position for {} has no leverage", symbol)))?;
    let entry_price = first_decimal(raw, ENTRY_FIELDS)?.unwrap_or_default();
    Ok(Some(Position {
        symbol: symbol.to_string(),
        side,
        size: signed_size.abs(),
        leverage,
        entry_price,
        mark_price: first_decimal(raw, MARK_FIELDS)?.unwrap_or(entry_price),
        unrealized_pnl: first_decimal(raw, PNL_FIELDS)?.unwrap_or_default(),
        liquidation_price: non_zero(first_decimal(raw, LIQ_FIELDS)?),
        stop_loss: non_zero(first_decimal(raw, &["stopLoss"])?),
        take_profit: non_zero(first_decimal(raw, &["takeProfit"])?),
    }))
}

fn first_decimal(raw: &Value, fields: &[&str]) -> Result<Option<Decimal>, OrderError> {
    for field in fields {
        let parsed = match raw.get(*field) {
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::String(s)) => parse_decimal(s.trim()),
            Some(Value::Number(n)) => parse_decimal(&n.to_string()),
            Some(Value::Null) | None => continue,
            Some(other) => {
                return Err(decode(format!("`{}` is not numeric: {}", field, other)));
            }
        };
        return parsed
            .map(Some)
            .ok_or_else(|| decode(format!("`{}` is not a valid number", field)));
    }
    Ok(None)
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

// venues send "0" for unset protective levels
fn non_zero(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| !v.is_zero())
}

fn decode(message: String) -> OrderError {
    OrderError::new(OrderErrorKind::Decode, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_bybit_shape() {
        let raw = json!({
            "symbol": "BTCUSDT", "side": "Sell", "size": "0.010", "leverage": "5",
            "avgPrice": "50000", "markPrice": "49900", "unrealisedPnl": "1",
            "liqPrice": "", "stopLoss": "51000", "takeProfit": "0"
        });
        let pos = parse_position("BTCUSDT", &raw).unwrap().unwrap();
        assert_eq!(pos.side, Side::Short);
        assert_eq!(pos.size, dec!(0.010));
        assert_eq!(pos.leverage, dec!(5));
        assert_eq!(pos.mark_price, dec!(49900));
        assert_eq!(pos.liquidation_price, None);
        assert_eq!(pos.stop_loss, Some(dec!(51000)));
        assert_eq!(pos.take_profit, None);
    }

    #[test]
    fn zero_size_is_no_position() {
        let raw = json!({ "symbol": "BTCUSDT", "side": "", "size": "0", "leverage": "5" });
        assert_eq!(parse_position("BTCUSDT", &raw).unwrap(), None);
        assert_eq!(parse_position("BTCUSDT", &json!({})).unwrap(), None);
    }

    #[test]
    fn signed_amount_sets_side() {
        let raw = json!({ "positionAmt": "-0.250", "entryPrice": "3000", "leverage": 10 });
        let pos = parse_position("ETHUSDT", &raw).unwrap().unwrap();
        assert_eq!(pos.side, Side::Short);
        assert_eq!(pos.size, dec!(0.250));
        assert_eq!(pos.leverage, dec!(10));
    }

    #[test]
    fn size_precedence_prefers_size_over_contracts() {
        let raw = json!({ "side": "long", "size": 2, "contracts": 7, "leverage": "3" });
        let pos = parse_position("X", &raw).unwrap().unwrap();
        assert_eq!(pos.size, dec!(2));

        let raw = json!({ "side": "long", "size": "", "contracts": 7, "leverage": "3" });
        let pos = parse_position("X", &raw).unwrap().unwrap();
        assert_eq!(pos.size, dec!(7));
    }

    #[test]
    fn open_position_without_leverage_is_a_decode_error() {
        let raw = json!({ "side": "Buy", "size": "0.010", "avgPrice": "50000" });
        let err = parse_position("BTCUSDT", &raw).unwrap_err();
        assert_eq!(err.kind, OrderErrorKind::Decode);
        assert!(err.message.contains("leverage"));

        let raw = json!({ "side": "Buy", "size": "0.010", "leverage": "" });
        assert!(parse_position("BTCUSDT", &raw).is_err());

        // a flat position never needs one
        let raw = json!({ "side": "", "size": "0" });
        assert_eq!(parse_position("BTCUSDT", &raw).unwrap(), None);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let raw = json!({ "side": "Buy", "size": "abc" });
        let err = parse_position("X", &raw).unwrap_err();
        assert_eq!(err.kind, OrderErrorKind::Decode);

        let raw = json!({ "side": "sideways", "size": "1" });
        assert!(parse_position("X", &raw).is_err());
    }
}
