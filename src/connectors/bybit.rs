// src/connectors/bybit.rs
use crate::config::ExchangeConfig;
use crate::connectors::messages::{
    lenient_decimal, BybitEnvelope, OrderCreateResult, PositionListResult, WalletBalanceResult,
};
use crate::connectors::traits::ExchangeClient;
use crate::error::{OrderError, OrderErrorKind};
use crate::types::{Balance, ExchangeAck, OrderKind, OrderRequest, Protection};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use tracing::{debug, info};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const CATEGORY: &str = "linear";

// retCodes that mean "nothing to do" for the call that produced them
const LEVERAGE_NOT_MODIFIED: i64 = 110043;
const TPSL_NOT_MODIFIED: i64 = 34040;
const DUPLICATE_ORDER_LINK_ID: i64 = 110072;

/// Maps a non-zero Bybit retCode onto our error taxonomy.
pub fn classify_ret_code(code: i64, msg: &str) -> OrderError {
    let kind = match code {
        10003 | 10004 | 10005 | 10007 | 10010 | 33004 => OrderErrorKind::Auth,
        10006 | 10018 => OrderErrorKind::RateLimited,
        110094 | 110092 | 110093 | 170136 | 170140 => OrderErrorKind::MinNotional,
        10016 => OrderErrorKind::Transport,
        _ => OrderErrorKind::Rejected,
    };
    OrderError::with_code(kind, code, msg)
}

pub struct BybitClient {
    api_key: String,
    secret_key: String,
    http_client: Client,
    base_rest_url: String,
    recv_window_ms: u64,
}

impl BybitClient {
    pub fn from_config(cfg: &ExchangeConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&cfg.base_url)?;
        let http_client = Client::builder().timeout(cfg.request_timeout()).build()?;

        Ok(Self {
            api_key: cfg.api_key.clone(),
            secret_key: cfg.secret_key.clone(),
            http_client,
            base_rest_url: base.as_str().trim_end_matches('/').to_string(),
            recv_window_ms: cfg.recv_window_ms,
        })
    }

    fn sign(&self, timestamp: &str, payload: &str) -> Result<String, OrderError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|_| OrderError::new(OrderErrorKind::Auth, "invalid secret key length"))?;
        mac.update(timestamp.as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(self.recv_window_ms.to_string().as_bytes());
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn send_signed_request(
        &self,
        method: Method,
        endpoint: &str,
        query: Vec<(&str, String)>,
        body: Option<Value>,
    ) -> Result<BybitEnvelope, OrderError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let query_string = serde_urlencoded::to_string(&query)
            .map_err(|e| OrderError::new(OrderErrorKind::Decode, e.to_string()))?;
        let body_string = match &body {
            Some(b) => serde_json::to_string(b)?,
            None => String::new(),
        };

        let payload = if method == Method::GET {
            query_string.as_str()
        } else {
            body_string.as_str()
        };
        let signature = self.sign(&timestamp, payload)?;

        let url = if query_string.is_empty() {
            format!("{}{}", self.base_rest_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_rest_url, endpoint, query_string)
        };

        let mut request = self
            .http_client
            .request(method, &url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", self.recv_window_ms.to_string());
        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_string);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, text));
        }

        let envelope = response.json::<BybitEnvelope>().await?;
        debug!(
            endpoint,
            ret_code = envelope.ret_code,
            ret_msg = %envelope.ret_msg,
            "bybit response"
        );
        Ok(envelope)
    }

    /// Turns an envelope into an ack; `no_change` codes become `NoChange`.
    fn into_ack(envelope: BybitEnvelope, no_change: &[i64]) -> Result<ExchangeAck, OrderError> {
        match envelope.ret_code {
            0 => {
                let order_id = envelope
                    .result
                    .get("orderId")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(ExchangeAck::Accepted { order_id })
            }
            code if no_change.contains(&code) => Ok(ExchangeAck::NoChange {
                reason: envelope.ret_msg,
            }),
            code => Err(classify_ret_code(code, &envelope.ret_msg)),
        }
    }

    fn into_result(envelope: BybitEnvelope) -> Result<Value, OrderError> {
        if envelope.ret_code != 0 {
            return Err(classify_ret_code(envelope.ret_code, &envelope.ret_msg));
        }
        Ok(envelope.result)
    }
}

fn classify_http_status(status: StatusCode, text: String) -> OrderError {
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => OrderErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED => OrderErrorKind::Auth,
        s if s.is_server_error() => OrderErrorKind::Transport,
        _ => OrderErrorKind::Rejected,
    };
    OrderError::with_code(kind, status.as_u16() as i64, text)
}

fn put_protection(body: &mut Map<String, Value>, protection: Protection) {
    if let Some(sl) = protection.stop_loss {
        body.insert("stopLoss".into(), json!(sl.to_string()));
    }
    if let Some(tp) = protection.take_profit {
        body.insert("takeProfit".into(), json!(tp.to_string()));
    }
    if !protection.is_empty() {
        body.insert("tpslMode".into(), json!("Full"));
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn name(&self) -> &str {
        "bybit"
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Balance, OrderError> {
        let envelope = self
            .send_signed_request(
                Method::GET,
                "/v5/account/wallet-balance",
                vec![("accountType", "UNIFIED".to_string()), ("coin", asset.to_string())],
                None,
            )
            .await?;
        let resp: WalletBalanceResult = serde_json::from_value(Self::into_result(envelope)?)?;

        let account = resp
            .list
            .into_iter()
            .next()
            .ok_or_else(|| OrderError::new(OrderErrorKind::Decode, "empty wallet list"))?;
        let coin = account
            .coin
            .iter()
            .find(|c| c.coin == asset)
            .ok_or_else(|| {
                OrderError::new(OrderErrorKind::Decode, format!("asset {} not in wallet", asset))
            })?;

        let total_equity = lenient_decimal(&coin.equity).unwrap_or_default();
        let used_margin = lenient_decimal(&coin.total_position_im).unwrap_or_default()
            + lenient_decimal(&coin.total_order_im).unwrap_or_default();
        let available_balance = lenient_decimal(&account.total_available_balance)
            .unwrap_or(total_equity - used_margin);

        Ok(Balance {
            asset: asset.to_string(),
            total_equity,
            used_margin,
            available_balance,
            unrealized_pnl: lenient_decimal(&coin.unrealised_pnl).unwrap_or_default(),
        })
    }

    async fn fetch_position_payload(&self, symbol: &str) -> Result<Option<Value>, OrderError> {
        let envelope = self
            .send_signed_request(
                Method::GET,
                "/v5/position/list",
                vec![("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
                None,
            )
            .await?;
        let resp: PositionListResult = serde_json::from_value(Self::into_result(envelope)?)?;

        // one-way mode: a single entry per symbol
        Ok(resp
            .list
            .into_iter()
            .find(|p| p.get("symbol").and_then(Value::as_str) == Some(symbol)))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<ExchangeAck, OrderError> {
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        let envelope = self
            .send_signed_request(Method::POST, "/v5/position/set-leverage", vec![], Some(body))
            .await?;
        Self::into_ack(envelope, &[LEVERAGE_NOT_MODIFIED])
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<ExchangeAck, OrderError> {
        let body = json!({ "category": CATEGORY, "symbol": symbol });
        let envelope = self
            .send_signed_request(Method::POST, "/v5/order/cancel-all", vec![], Some(body))
            .await?;
        let result = Self::into_result(envelope)?;

        let cancelled = result
            .get("list")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if cancelled == 0 {
            return Ok(ExchangeAck::NoChange {
                reason: "no open orders".to_string(),
            });
        }
        info!("🧹 Cancelled {} open orders on {}", cancelled, symbol);
        Ok(ExchangeAck::Accepted { order_id: None })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeAck, OrderError> {
        let mut body = Map::new();
        body.insert("category".into(), json!(CATEGORY));
        body.insert("symbol".into(), json!(request.symbol));
        body.insert("side".into(), json!(request.side.as_str()));
        body.insert("qty".into(), json!(request.quantity.to_string()));
        body.insert("reduceOnly".into(), json!(request.reduce_only));
        body.insert("positionIdx".into(), json!(0));
        body.insert("orderLinkId".into(), json!(request.client_id));

        match (request.kind, request.price) {
            (OrderKind::Limit, Some(price)) => {
                body.insert("orderType".into(), json!("Limit"));
                body.insert("price".into(), json!(price.to_string()));
                body.insert("timeInForce".into(), json!("GTC"));
            }
            (OrderKind::Limit, None) => {
                return Err(OrderError::new(
                    OrderErrorKind::Rejected,
                    "limit order without price",
                ));
            }
            (OrderKind::Market, _) => {
                body.insert("orderType".into(), json!("Market"));
            }
        }
        if !request.reduce_only {
            put_protection(&mut body, request.protection);
        }

        info!(
            "🚀 Sending Order: {} {:?} {} {} @ {:?} reduce_only={}",
            request.side.as_str(),
            request.kind,
            request.quantity,
            request.symbol,
            request.price,
            request.reduce_only
        );

        let envelope = self
            .send_signed_request(Method::POST, "/v5/order/create", vec![], Some(Value::Object(body)))
            .await?;

        if envelope.ret_code == 0 {
            let created: OrderCreateResult = serde_json::from_value(envelope.result)?;
            return Ok(ExchangeAck::Accepted {
                order_id: Some(created.order_id),
            });
        }
        // a retried submission whose first attempt already landed
        Self::into_ack(envelope, &[DUPLICATE_ORDER_LINK_ID])
    }

    async fn set_position_protection(
        &self,
        symbol: &str,
        protection: Protection,
    ) -> Result<ExchangeAck, OrderError> {
        let mut body = Map::new();
        body.insert("category".into(), json!(CATEGORY));
        body.insert("symbol".into(), json!(symbol));
        body.insert("positionIdx".into(), json!(0));
        put_protection(&mut body, protection);

        let envelope = self
            .send_signed_request(
                Method::POST,
                "/v5/position/trading-stop",
                vec![],
                Some(Value::Object(body)),
            )
            .await?;
        Self::into_ack(envelope, &[TPSL_NOT_MODIFIED])
    }
}
