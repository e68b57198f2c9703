use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use the_reconciler::connectors::paper::{ExchangeCall, PaperExchange, PaperOp};
use the_reconciler::types::{OrderKind, OrderRequest, OrderSide, Side};
use the_reconciler::utils::retry::{CallPolicy, RetryConfig};
use the_reconciler::{
    ChannelSink, ConflictPolicy, ErrorKind, Notification, OrderError, OrderErrorKind, PlanCase,
    PlanStep, Reconciler, ReconcilerConfig, SignalRequest, TracingSink,
};
use tokio::sync::mpsc;

const SYMBOL: &str = "BTCUSDT";

fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        min_order_size: dec!(0.001),
        max_order_size: dec!(100),
        quantity_step: dec!(0.001),
        price_tick: dec!(0.1),
        min_adjust_size: dec!(0.001),
        leverage_threshold: 3,
        flat_confirm_delay_ms: 0,
        ..ReconcilerConfig::default()
    }
}

fn policy() -> CallPolicy {
    CallPolicy::new(RetryConfig::no_retry(), Duration::from_secs(2))
}

fn reconciler(paper: &Arc<PaperExchange>) -> Reconciler {
    Reconciler::new(paper.clone(), config(), policy(), Arc::new(TracingSink))
}

fn signal(v: Value) -> SignalRequest {
    serde_json::from_value(v).unwrap()
}

fn long_ratio(ratio: f64) -> SignalRequest {
    signal(json!({
        "symbol": SYMBOL, "side": "Long", "leverage": 5, "size": ratio,
        "entry_price": 50000, "stop_loss": 49000, "take_profit": 51000
    }))
}

fn contracts(side: &str, leverage: u32, qty: &str) -> SignalRequest {
    signal(json!({
        "side": side, "leverage": leverage, "size": qty, "size_unit": "contracts",
        "entry_price": 50000
    }))
}

fn with_long(size: Decimal, leverage: u32) -> Arc<PaperExchange> {
    Arc::new(
        PaperExchange::new(dec!(10000))
            .with_position(SYMBOL, Side::Long, size, leverage, dec!(50000))
            .with_mark_price(SYMBOL, dec!(50000)),
    )
}

fn orders(paper: &PaperExchange) -> Vec<OrderRequest> {
    paper
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ExchangeCall::PlaceOrder(req) => Some(req),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn opens_from_flat_with_protection() {
    let paper = Arc::new(PaperExchange::new(dec!(10000)));
    let result = reconciler(&paper).reconcile(SYMBOL, &long_ratio(0.10)).await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.case, Some(PlanCase::Open));

    let mutating = paper.mutating_calls();
    assert_eq!(mutating.len(), 3);
    assert_eq!(mutating[0], ExchangeCall::CancelAll { symbol: SYMBOL.into() });
    assert_eq!(
        mutating[1],
        ExchangeCall::SetLeverage {
            symbol: SYMBOL.into(),
            leverage: 5
        }
    );
    match &mutating[2] {
        ExchangeCall::PlaceOrder(req) => {
            assert_eq!(req.side, OrderSide::Buy);
            assert_eq!(req.kind, OrderKind::Limit);
            assert_eq!(req.quantity, dec!(0.010));
            assert_eq!(req.price, Some(dec!(50000)));
            assert!(!req.reduce_only);
            assert_eq!(req.protection.stop_loss, Some(dec!(49000)));
            assert_eq!(req.protection.take_profit, Some(dec!(51000)));
        }
        other => panic!("expected an order, got {:?}", other),
    }
    assert_eq!(paper.position(SYMBOL), Some((Side::Long, dec!(0.010), 5)));
}

#[tokio::test]
async fn increases_by_the_delta_only() {
    let paper = with_long(dec!(0.010), 5);
    let result = reconciler(&paper).reconcile(SYMBOL, &long_ratio(0.015)).await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.case, Some(PlanCase::Increase));
    let placed = orders(&paper);
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].side, OrderSide::Buy);
    assert_eq!(placed[0].quantity, dec!(0.005));
    assert!(!placed[0].protection.is_empty());
    assert_eq!(paper.position(SYMBOL), Some((Side::Long, dec!(0.015), 5)));
}

#[tokio::test]
async fn decreases_with_reduce_only_market_and_no_protection() {
    let paper = with_long(dec!(0.010), 5);
    let result = reconciler(&paper)
        .reconcile(SYMBOL, &contracts("Long", 5, "0.004"))
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.case, Some(PlanCase::Decrease));
    let placed = orders(&paper);
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].kind, OrderKind::Market);
    assert!(placed[0].reduce_only);
    assert_eq!(placed[0].quantity, dec!(0.006));
    assert!(placed[0].protection.is_empty());
    assert_eq!(paper.position(SYMBOL), Some((Side::Long, dec!(0.004), 5)));
}

#[tokio::test]
async fn flips_by_closing_everything_first() {
    let paper = with_long(dec!(0.010), 5);
    let result = reconciler(&paper)
        .reconcile(SYMBOL, &contracts("Short", 5, "0.010"))
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.case, Some(PlanCase::Flip));
    let actions: Vec<_> = result.steps_executed.iter().map(|s| s.step.action()).collect();
    assert_eq!(
        actions,
        [
            "cancel_open_orders",
            "close_at_market",
            "confirm_flat",
            "set_leverage",
            "open_limit"
        ]
    );
    // leverage already matched
    assert!(result.steps_executed[3].response.starts_with("no change"));

    let placed = orders(&paper);
    assert_eq!(placed.len(), 2);
    assert!(placed[0].reduce_only);
    assert_eq!(placed[0].side, OrderSide::Sell);
    assert_eq!(placed[0].quantity, dec!(0.010));
    assert!(!placed[1].reduce_only);
    assert_eq!(placed[1].side, OrderSide::Sell);
    assert_eq!(paper.position(SYMBOL), Some((Side::Short, dec!(0.010), 5)));
}

#[tokio::test]
async fn releverages_only_after_confirmed_flat() {
    let paper = with_long(dec!(0.010), 5);
    let result = reconciler(&paper)
        .reconcile(SYMBOL, &contracts("Long", 20, "0.010"))
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.case, Some(PlanCase::ReLeverage));

    let calls = paper.calls();
    let close = calls
        .iter()
        .position(|c| matches!(c, ExchangeCall::PlaceOrder(r) if r.reduce_only))
        .unwrap();
    let set_leverage = calls
        .iter()
        .position(|c| matches!(c, ExchangeCall::SetLeverage { leverage: 20, .. }))
        .unwrap();
    let confirm = calls[close..set_leverage]
        .iter()
        .any(|c| matches!(c, ExchangeCall::FetchPosition { .. }));
    assert!(close < set_leverage);
    assert!(confirm, "no position re-read between close and leverage change");
    assert_eq!(paper.position(SYMBOL), Some((Side::Long, dec!(0.010), 20)));
}

#[tokio::test]
async fn stale_orders_are_cancelled_before_every_entry() {
    for (label, start, resting, request, case) in [
        ("flip", dec!(0.010), 2, contracts("Short", 5, "0.010"), PlanCase::Flip),
        ("increase", dec!(0.004), 1, contracts("Long", 5, "0.010"), PlanCase::Increase),
        ("re-leverage", dec!(0.010), 3, contracts("Long", 20, "0.010"), PlanCase::ReLeverage),
    ] {
        let paper = with_long(start, 5);
        paper.seed_open_orders(SYMBOL, resting);

        let result = reconciler(&paper).reconcile(SYMBOL, &request).await;

        assert!(result.success, "{}: {:?}", label, result);
        assert_eq!(result.case, Some(case), "{}", label);
        assert_eq!(paper.open_orders(SYMBOL), 0, "{}: resting orders survived", label);

        let calls = paper.mutating_calls();
        let cancel = calls
            .iter()
            .position(|c| matches!(c, ExchangeCall::CancelAll { .. }));
        let first_order = calls
            .iter()
            .position(|c| matches!(c, ExchangeCall::PlaceOrder(_)));
        assert_eq!(cancel, Some(0), "{}: cancel must come first", label);
        assert!(cancel < first_order, "{}", label);
    }
}

#[tokio::test]
async fn tiny_delta_is_a_no_op() {
    let paper = with_long(dec!(0.010), 5);
    let result = reconciler(&paper)
        .reconcile(SYMBOL, &contracts("Long", 5, "0.0103"))
        .await;

    assert!(result.success);
    assert_eq!(result.case, Some(PlanCase::Converged));
    assert!(result.steps_executed.is_empty());
    assert!(paper.mutating_calls().is_empty());
}

#[tokio::test]
async fn second_identical_signal_changes_nothing() {
    let paper = Arc::new(PaperExchange::new(dec!(10000)));
    let reconciler = reconciler(&paper);

    assert!(reconciler.reconcile(SYMBOL, &long_ratio(0.10)).await.success);
    paper.clear_calls();

    let again = reconciler.reconcile(SYMBOL, &long_ratio(0.10)).await;
    assert!(again.success);
    assert_eq!(again.case, Some(PlanCase::Converged));
    assert!(again.steps_executed.is_empty());
    assert!(paper.mutating_calls().is_empty());
}

#[tokio::test]
async fn converged_position_gets_new_stop() {
    let paper = Arc::new(PaperExchange::new(dec!(10000)));
    let reconciler = reconciler(&paper);
    assert!(reconciler.reconcile(SYMBOL, &long_ratio(0.10)).await.success);

    let mut moved = long_ratio(0.10);
    moved.stop_loss = Some(json!(49500));
    let result = reconciler.reconcile(SYMBOL, &moved).await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.steps_executed.len(), 1);
    assert!(matches!(
        result.steps_executed[0].step,
        PlanStep::UpdateProtection { .. }
    ));
    let protection = paper.protection(SYMBOL).unwrap();
    assert_eq!(protection.stop_loss, Some(dec!(49500)));
    assert_eq!(protection.take_profit, Some(dec!(51000)));
}

#[tokio::test]
async fn concurrent_signals_are_serialized() {
    let paper = Arc::new(PaperExchange::new(dec!(10000)).with_latency(Duration::from_millis(10)));
    let reconciler = Arc::new(reconciler(&paper));
    let request = long_ratio(0.10);

    let (a, b) = futures::join!(
        reconciler.reconcile(SYMBOL, &request),
        reconciler.reconcile(SYMBOL, &request)
    );

    assert!(a.success && b.success);
    let mut cases = vec![a.case, b.case];
    cases.sort_by_key(|c| format!("{:?}", c));
    assert_eq!(cases, vec![Some(PlanCase::Converged), Some(PlanCase::Open)]);
    assert_eq!(orders(&paper).len(), 1);
    assert_eq!(paper.position(SYMBOL), Some((Side::Long, dec!(0.010), 5)));
}

#[tokio::test]
async fn reject_policy_turns_away_concurrent_signal() {
    let paper = Arc::new(PaperExchange::new(dec!(10000)).with_latency(Duration::from_millis(10)));
    let reconciler = Reconciler::new(
        paper.clone(),
        ReconcilerConfig {
            conflict_policy: ConflictPolicy::Reject,
            ..config()
        },
        policy(),
        Arc::new(TracingSink),
    );
    let request = long_ratio(0.10);

    let (a, b) = futures::join!(
        reconciler.reconcile(SYMBOL, &request),
        reconciler.reconcile(SYMBOL, &request)
    );

    let busy = [&a, &b]
        .iter()
        .filter(|r| r.error == Some(ErrorKind::Busy))
        .count();
    assert_eq!(busy, 1);
    assert!(a.success || b.success);
    assert_eq!(orders(&paper).len(), 1);
}

#[tokio::test]
async fn reduce_only_never_exceeds_observed_size() {
    for (size, side, lev, qty) in [
        (dec!(0.010), "Short", 5, "0.5"),
        (dec!(0.010), "Long", 5, "0.001"),
        (dec!(0.003), "Long", 20, "0.010"),
    ] {
        let paper = with_long(size, 5);
        let result = reconciler(&paper)
            .reconcile(SYMBOL, &contracts(side, lev, qty))
            .await;
        assert!(result.success, "{:?}", result);
        for order in orders(&paper).iter().filter(|o| o.reduce_only) {
            assert!(order.quantity <= size);
        }
    }
}

#[tokio::test]
async fn failed_entry_reports_last_response() {
    let paper = Arc::new(PaperExchange::new(dec!(10000)));
    paper.fail_next(
        PaperOp::PlaceOrder,
        OrderError::with_code(OrderErrorKind::MinNotional, 110094, "order value too small"),
    );
    let result = reconciler(&paper).reconcile(SYMBOL, &long_ratio(0.10)).await;

    assert!(!result.success);
    assert_eq!(result.error, Some(ErrorKind::Order(OrderErrorKind::MinNotional)));
    assert_eq!(result.steps_executed.len(), 2);
    assert!(result
        .last_response
        .as_deref()
        .unwrap_or_default()
        .contains("order value too small"));
    assert_eq!(paper.position(SYMBOL), None);
}

#[tokio::test]
async fn slow_exchange_surfaces_as_timeout() {
    let paper = Arc::new(PaperExchange::new(dec!(10000)).with_latency(Duration::from_millis(200)));
    let reconciler = Reconciler::new(
        paper.clone(),
        config(),
        CallPolicy::new(RetryConfig::no_retry(), Duration::from_millis(20)),
        Arc::new(TracingSink),
    );
    let result = reconciler.reconcile(SYMBOL, &long_ratio(0.10)).await;

    assert_eq!(result.error, Some(ErrorKind::Order(OrderErrorKind::Timeout)));
    assert!(paper.mutating_calls().is_empty());
}

#[tokio::test]
async fn sink_sees_every_step_then_the_outcome() {
    let paper = Arc::new(PaperExchange::new(dec!(10000)));
    let (tx, mut rx) = mpsc::channel(16);
    let reconciler = Reconciler::new(paper, config(), policy(), Arc::new(ChannelSink::new(tx)));

    reconciler.reconcile(SYMBOL, &long_ratio(0.10)).await;

    let mut actions = Vec::new();
    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            Notification::Step(step) => actions.push(step.action),
            Notification::Finished { result, .. } => finished = Some(result),
        }
    }
    assert_eq!(actions, ["cancel_open_orders", "set_leverage", "open_limit"]);
    assert!(finished.map(|r| r.success).unwrap_or(false));
}
