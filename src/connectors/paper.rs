// src/connectors/paper.rs
//! In-memory derivatives venue for paper trading and tests.
//!
//! Limit orders fill immediately at their limit price, market orders at the
//! mark price. Leverage can only change while flat and reduce-only orders
//! may never exceed the open size, like on a real venue.

use crate::connectors::traits::ExchangeClient;
use crate::error::{OrderError, OrderErrorKind};
use crate::types::{Balance, ExchangeAck, OrderKind, OrderRequest, OrderSide, Protection, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperOp {
    FetchBalance,
    FetchPosition,
    SetLeverage,
    CancelAll,
    PlaceOrder,
    SetProtection,
}

/// Every call the venue received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeCall {
    FetchBalance,
    FetchPosition { symbol: String },
    SetLeverage { symbol: String, leverage: u32 },
    CancelAll { symbol: String },
    PlaceOrder(OrderRequest),
    SetProtection { symbol: String, protection: Protection },
}

impl ExchangeCall {
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            ExchangeCall::FetchBalance | ExchangeCall::FetchPosition { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    side: Side,
    size: Decimal,
    entry_price: Decimal,
    protection: Protection,
}

#[derive(Debug, Default)]
struct PaperState {
    wallet_balance: Decimal,
    mark_prices: HashMap<String, Decimal>,
    positions: HashMap<String, PaperPosition>,
    leverage: HashMap<String, u32>,
    open_orders: HashMap<String, usize>,
    client_ids: HashSet<String>,
    calls: Vec<ExchangeCall>,
    failures: HashMap<PaperOp, VecDeque<OrderError>>,
    refuse_to_flatten: bool,
}

impl PaperState {
    fn take_failure(&mut self, op: PaperOp) -> Result<(), OrderError> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn leverage_of(&self, symbol: &str) -> u32 {
        self.leverage.get(symbol).copied().unwrap_or(1)
    }

    fn mark_of(&self, symbol: &str) -> Option<Decimal> {
        self.mark_prices
            .get(symbol)
            .copied()
            .or_else(|| self.positions.get(symbol).map(|p| p.entry_price))
    }

    fn unrealized(&self, symbol: &str, pos: &PaperPosition) -> Decimal {
        let mark = self.mark_of(symbol).unwrap_or(pos.entry_price);
        let diff = match pos.side {
            Side::Long => mark - pos.entry_price,
            Side::Short => pos.entry_price - mark,
        };
        diff * pos.size
    }

    fn fill(&mut self, request: &OrderRequest, price: Decimal) -> Result<(), OrderError> {
        let side = match request.side {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        };
        let existing = self.positions.get(&request.symbol).cloned();

        match existing {
            Some(mut pos) if pos.side != side => {
                if request.reduce_only && request.quantity > pos.size {
                    return Err(OrderError::with_code(
                        OrderErrorKind::Rejected,
                        110017,
                        "reduce-only order exceeds position size",
                    ));
                }
                if request.reduce_only && self.refuse_to_flatten {
                    return Ok(());
                }
                let closed = request.quantity.min(pos.size);
                let pnl = match pos.side {
                    Side::Long => (price - pos.entry_price) * closed,
                    Side::Short => (pos.entry_price - price) * closed,
                };
                self.wallet_balance += pnl;

                let remainder = request.quantity - closed;
                pos.size -= closed;
                if pos.size.is_zero() {
                    self.positions.remove(&request.symbol);
                } else {
                    self.positions.insert(request.symbol.clone(), pos);
                }
                if !remainder.is_zero() {
                    self.positions.insert(
                        request.symbol.clone(),
                        PaperPosition {
                            side,
                            size: remainder,
                            entry_price: price,
                            protection: request.protection,
                        },
                    );
                }
            }
            _ if request.reduce_only => {
                return Err(OrderError::with_code(
                    OrderErrorKind::Rejected,
                    110017,
                    "reduce-only order would increase position",
                ));
            }
            Some(mut pos) => {
                let total = pos.size + request.quantity;
                pos.entry_price = (pos.entry_price * pos.size + price * request.quantity) / total;
                pos.size = total;
                if !request.protection.is_empty() {
                    pos.protection = request.protection;
                }
                self.positions.insert(request.symbol.clone(), pos);
            }
            None => {
                self.positions.insert(
                    request.symbol.clone(),
                    PaperPosition {
                        side,
                        size: request.quantity,
                        entry_price: price,
                        protection: request.protection,
                    },
                );
            }
        }
        Ok(())
    }
}

fn opt_str(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub struct PaperExchange {
    state: Mutex<PaperState>,
    latency: Duration,
}

impl PaperExchange {
    pub fn new(wallet_balance: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                wallet_balance,
                ..PaperState::default()
            }),
            latency: Duration::ZERO,
        }
    }

    /// Delay applied to every call, to widen race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_mark_price(self, symbol: &str, price: Decimal) -> Self {
        self.set_mark_price(symbol, price);
        self
    }

    pub fn with_position(
        self,
        symbol: &str,
        side: Side,
        size: Decimal,
        leverage: u32,
        entry_price: Decimal,
    ) -> Self {
        {
            let mut state = self.lock();
            state.leverage.insert(symbol.to_string(), leverage);
            state.positions.insert(
                symbol.to_string(),
                PaperPosition {
                    side,
                    size,
                    entry_price,
                    protection: Protection::default(),
                },
            );
        }
        self
    }

    pub fn set_mark_price(&self, symbol: &str, price: Decimal) {
        self.lock().mark_prices.insert(symbol.to_string(), price);
    }

    pub fn seed_open_orders(&self, symbol: &str, count: usize) {
        self.lock().open_orders.insert(symbol.to_string(), count);
    }

    pub fn open_orders(&self, symbol: &str) -> usize {
        self.lock().open_orders.get(symbol).copied().unwrap_or(0)
    }

    /// Queue an error for the next call of `op`.
    pub fn fail_next(&self, op: PaperOp, err: OrderError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Accept reduce-only orders without filling them.
    pub fn refuse_to_flatten(&self, refuse: bool) {
        self.lock().refuse_to_flatten = refuse;
    }

    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<ExchangeCall> {
        self.calls().into_iter().filter(ExchangeCall::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// (side, size, leverage) of the open position, if any.
    pub fn position(&self, symbol: &str) -> Option<(Side, Decimal, u32)> {
        let state = self.lock();
        state
            .positions
            .get(symbol)
            .map(|p| (p.side, p.size, state.leverage_of(symbol)))
    }

    pub fn protection(&self, symbol: &str) -> Option<Protection> {
        self.lock().positions.get(symbol).map(|p| p.protection)
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Balance, OrderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(ExchangeCall::FetchBalance);
        state.take_failure(PaperOp::FetchBalance)?;

        let mut unrealized_pnl = Decimal::ZERO;
        let mut used_margin = Decimal::ZERO;
        for (symbol, pos) in &state.positions {
            unrealized_pnl += state.unrealized(symbol, pos);
            used_margin += pos.size * pos.entry_price / Decimal::from(state.leverage_of(symbol));
        }
        let total_equity = state.wallet_balance + unrealized_pnl;

        Ok(Balance {
            asset: asset.to_string(),
            total_equity,
            used_margin,
            available_balance: total_equity - used_margin,
            unrealized_pnl,
        })
    }

    async fn fetch_position_payload(&self, symbol: &str) -> Result<Option<Value>, OrderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(ExchangeCall::FetchPosition {
            symbol: symbol.to_string(),
        });
        state.take_failure(PaperOp::FetchPosition)?;

        let leverage = state.leverage_of(symbol);
        // flat positions are still listed with size "0", as venues do
        let payload = match state.positions.get(symbol) {
            Some(pos) => json!({
                "symbol": symbol,
                "side": pos.side.entry_order_side().as_str(),
                "size": pos.size.to_string(),
                "leverage": leverage.to_string(),
                "avgPrice": pos.entry_price.to_string(),
                "markPrice": opt_str(state.mark_of(symbol)),
                "unrealisedPnl": state.unrealized(symbol, pos).to_string(),
                "liqPrice": "",
                "stopLoss": opt_str(pos.protection.stop_loss),
                "takeProfit": opt_str(pos.protection.take_profit),
            }),
            None => json!({
                "symbol": symbol,
                "side": "",
                "size": "0",
                "leverage": leverage.to_string(),
                "avgPrice": "0",
            }),
        };
        Ok(Some(payload))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<ExchangeAck, OrderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(ExchangeCall::SetLeverage {
            symbol: symbol.to_string(),
            leverage,
        });
        state.take_failure(PaperOp::SetLeverage)?;

        if state.leverage_of(symbol) == leverage {
            return Ok(ExchangeAck::NoChange {
                reason: "leverage not modified".to_string(),
            });
        }
        if state.positions.contains_key(symbol) {
            return Err(OrderError::with_code(
                OrderErrorKind::Rejected,
                110044,
                "cannot change leverage with an open position",
            ));
        }
        state.leverage.insert(symbol.to_string(), leverage);
        Ok(ExchangeAck::Accepted { order_id: None })
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<ExchangeAck, OrderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(ExchangeCall::CancelAll {
            symbol: symbol.to_string(),
        });
        state.take_failure(PaperOp::CancelAll)?;

        match state.open_orders.remove(symbol) {
            Some(n) if n > 0 => Ok(ExchangeAck::Accepted { order_id: None }),
            _ => Ok(ExchangeAck::NoChange {
                reason: "no open orders".to_string(),
            }),
        }
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeAck, OrderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(ExchangeCall::PlaceOrder(request.clone()));
        state.take_failure(PaperOp::PlaceOrder)?;

        if state.client_ids.contains(&request.client_id) {
            return Ok(ExchangeAck::NoChange {
                reason: "duplicate client order id".to_string(),
            });
        }

        let price = match request.kind {
            OrderKind::Limit => request.price,
            OrderKind::Market => state.mark_of(&request.symbol),
        }
        .ok_or_else(|| OrderError::new(OrderErrorKind::Rejected, "no price to fill at"))?;

        state.fill(request, price)?;
        state.client_ids.insert(request.client_id.clone());

        let order_id = format!("paper-{}", state.client_ids.len());
        info!(
            "📝 Paper fill: {:?} {:?} {} {} @ {}",
            request.side, request.kind, request.quantity, request.symbol, price
        );
        Ok(ExchangeAck::Accepted {
            order_id: Some(order_id),
        })
    }

    async fn set_position_protection(
        &self,
        symbol: &str,
        protection: Protection,
    ) -> Result<ExchangeAck, OrderError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(ExchangeCall::SetProtection {
            symbol: symbol.to_string(),
            protection,
        });
        state.take_failure(PaperOp::SetProtection)?;

        let pos = state.positions.get_mut(symbol).ok_or_else(|| {
            OrderError::with_code(OrderErrorKind::Rejected, 10001, "no open position")
        })?;
        // absent levels leave the existing ones in place
        let merged = Protection {
            stop_loss: protection.stop_loss.or(pos.protection.stop_loss),
            take_profit: protection.take_profit.or(pos.protection.take_profit),
        };
        if pos.protection == merged {
            return Ok(ExchangeAck::NoChange {
                reason: "not modified".to_string(),
            });
        }
        pos.protection = merged;
        Ok(ExchangeAck::Accepted { order_id: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(
        side: OrderSide,
        kind: OrderKind,
        qty: Decimal,
        reduce_only: bool,
        id: &str,
    ) -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".into(),
            side,
            kind,
            quantity: qty,
            price: Some(dec!(50000)),
            reduce_only,
            protection: Protection::default(),
            client_id: id.into(),
        }
    }

    #[tokio::test]
    async fn limit_order_opens_position() {
        let ex = PaperExchange::new(dec!(10000));
        ex.place_order(&order(OrderSide::Buy, OrderKind::Limit, dec!(0.010), false, "a"))
            .await
            .unwrap();
        assert_eq!(ex.position("BTCUSDT"), Some((Side::Long, dec!(0.010), 1)));
    }

    #[tokio::test]
    async fn reduce_only_cannot_exceed_position() {
        let ex = PaperExchange::new(dec!(10000)).with_position(
            "BTCUSDT",
            Side::Long,
            dec!(0.010),
            5,
            dec!(50000),
        );
        let err = ex
            .place_order(&order(OrderSide::Sell, OrderKind::Market, dec!(0.020), true, "b"))
            .await
            .unwrap_err();
        assert_eq!(err.code, Some(110017));
        assert_eq!(ex.position("BTCUSDT"), Some((Side::Long, dec!(0.010), 5)));
    }

    #[tokio::test]
    async fn duplicate_client_id_is_no_change() {
        let ex = PaperExchange::new(dec!(10000));
        let req = order(OrderSide::Buy, OrderKind::Limit, dec!(0.010), false, "same");
        ex.place_order(&req).await.unwrap();
        let ack = ex.place_order(&req).await.unwrap();
        assert!(matches!(ack, ExchangeAck::NoChange { .. }));
        assert_eq!(ex.position("BTCUSDT").unwrap().1, dec!(0.010));
    }

    #[tokio::test]
    async fn leverage_change_requires_flat() {
        let ex = PaperExchange::new(dec!(10000)).with_position(
            "BTCUSDT",
            Side::Long,
            dec!(0.010),
            5,
            dec!(50000),
        );
        assert!(matches!(
            ex.set_leverage("BTCUSDT", 5).await.unwrap(),
            ExchangeAck::NoChange { .. }
        ));
        assert!(ex.set_leverage("BTCUSDT", 20).await.is_err());
    }

    #[tokio::test]
    async fn balance_reflects_unrealized_pnl() {
        let ex = PaperExchange::new(dec!(10000))
            .with_position("BTCUSDT", Side::Long, dec!(0.010), 5, dec!(50000))
            .with_mark_price("BTCUSDT", dec!(51000));
        let balance = ex.fetch_balance("USDT").await.unwrap();
        assert_eq!(balance.unrealized_pnl, dec!(10));
        assert_eq!(balance.total_equity, dec!(10010));
        assert_eq!(balance.used_margin, dec!(100));
    }
}
