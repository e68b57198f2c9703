// src/core/reconciler.rs
use crate::config::ReconcilerConfig;
use crate::connectors::traits::ExchangeClient;
use crate::core::balance::BalanceReader;
use crate::core::gateway::OrderGateway;
use crate::core::notify::{Notification, NotificationSink, StepEvent};
use crate::core::plan::{decide, PlanCase, PlanStep, ReconciliationPlan, Target};
use crate::core::position::PositionReader;
use crate::core::serializer::SignalSerializer;
use crate::core::sizer::Sizer;
use crate::core::validator::{SignalRequest, SignalValidator};
use crate::error::{ErrorKind, ReconcileError, SizingError, StateMismatchError};
use crate::types::{ExchangeAck, Position, Protection, TradingSignal};
use crate::utils::precision::normalize_price;
use crate::utils::retry::CallPolicy;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedStep {
    pub step: PlanStep,
    pub response: String,
}

/// Outcome of one `reconcile` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanResult {
    pub success: bool,
    /// `None` when the call failed before a plan was decided.
    pub case: Option<PlanCase>,
    pub steps_executed: Vec<ExecutedStep>,
    pub error: Option<ErrorKind>,
    pub error_detail: Option<String>,
    /// Last exchange acknowledgement or error text seen during the call.
    pub last_response: Option<String>,
}

/// Drives one symbol from its observed exchange position to a signal's target.
///
/// Nothing survives between calls except what the exchange itself holds:
/// position and balance are re-read on every call and every call runs under
/// the per-symbol serializer.
pub struct Reconciler {
    config: ReconcilerConfig,
    validator: SignalValidator,
    sizer: Sizer,
    balances: BalanceReader,
    positions: PositionReader,
    gateway: OrderGateway,
    serializer: SignalSerializer,
    sink: Arc<dyn NotificationSink>,
}

// Mutable bookkeeping for one execution; folded into the PlanResult at the end.
#[derive(Default)]
struct Run {
    case: Option<PlanCase>,
    executed: Vec<ExecutedStep>,
    last_response: Option<String>,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        config: ReconcilerConfig,
        policy: CallPolicy,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            validator: SignalValidator::new(&config),
            sizer: Sizer::new(&config),
            balances: BalanceReader::new(client.clone(), config.quote_asset.clone(), policy.clone()),
            positions: PositionReader::new(client.clone(), policy.clone()),
            gateway: OrderGateway::new(client, policy, config.price_tick, config.quantity_step),
            serializer: SignalSerializer::new(config.conflict_policy),
            sink,
            config,
        }
    }

    pub async fn reconcile(&self, symbol: &str, request: &SignalRequest) -> PlanResult {
        let mut run = Run::default();

        let outcome = match self.serializer.acquire(symbol).await {
            Ok(_guard) => self.run(symbol, request, &mut run).await,
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(()) => PlanResult {
                success: true,
                case: run.case,
                steps_executed: run.executed,
                error: None,
                error_detail: None,
                last_response: run.last_response,
            },
            Err(e) => {
                error!(symbol, error = %e, "reconciliation aborted");
                PlanResult {
                    success: false,
                    case: run.case,
                    steps_executed: run.executed,
                    error: Some(e.kind()),
                    error_detail: Some(e.to_string()),
                    last_response: run.last_response,
                }
            }
        };

        self.sink.notify(Notification::Finished {
            symbol: symbol.to_string(),
            result: result.clone(),
        });
        result
    }

    async fn run(&self, symbol: &str, request: &SignalRequest, run: &mut Run) -> Result<(), ReconcileError> {
        let signal = self.validator.validate(symbol, request)?;
        let position = self.positions.read(symbol).await?;
        let target = self.target(&signal).await?;

        let plan = decide(position.as_ref(), &target, &self.config);
        info!(
            symbol,
            case = ?plan.case,
            steps = plan.steps.len(),
            observed = ?position.as_ref().map(|p| (p.side, p.size, p.leverage)),
            target = ?(target.side, target.quantity, target.leverage),
            "plan decided"
        );
        run.case = Some(plan.case);

        self.execute(symbol, &plan, position.as_ref(), run).await
    }

    /// Sizes and normalizes the target before anything is mutated.
    async fn target(&self, signal: &TradingSignal) -> Result<Target, ReconcileError> {
        let tick = self.config.price_tick;
        let entry_price = normalize_price(signal.entry_price, tick);
        if entry_price <= Decimal::ZERO {
            return Err(SizingError::InvalidPrice(entry_price).into());
        }

        let balance = if Sizer::needs_balance(signal) {
            Some(self.balances.read().await?)
        } else {
            None
        };
        let quantity = self.sizer.quantity_for(signal, entry_price, balance.as_ref())?;

        let protection = signal.protection();
        Ok(Target {
            side: signal.side,
            leverage: signal.leverage,
            quantity,
            entry_price,
            protection: Protection {
                stop_loss: protection.stop_loss.map(|p| normalize_price(p, tick)),
                take_profit: protection.take_profit.map(|p| normalize_price(p, tick)),
            },
        })
    }

    async fn execute(
        &self,
        symbol: &str,
        plan: &ReconciliationPlan,
        position: Option<&Position>,
        run: &mut Run,
    ) -> Result<(), ReconcileError> {
        let observed = position.map(|p| p.size).unwrap_or_default();

        for step in &plan.steps {
            if let Some(quantity) = step.quantity().filter(|_| step.is_reduce_only()) {
                if quantity > observed {
                    return Err(StateMismatchError {
                        symbol: symbol.to_string(),
                        observed,
                        reason: format!("reduce-only {} exceeds observed position", quantity),
                    }
                    .into());
                }
            }

            let response = match self.execute_step(symbol, step).await {
                Ok(response) => response,
                Err(e) => {
                    run.last_response = Some(e.to_string());
                    return Err(e);
                }
            };

            run.last_response = Some(response.clone());
            self.sink.notify(Notification::Step(StepEvent {
                symbol: symbol.to_string(),
                action: step.action(),
                quantity: step.quantity(),
                price: step.price(),
                response: response.clone(),
            }));
            run.executed.push(ExecutedStep {
                step: step.clone(),
                response,
            });
        }
        Ok(())
    }

    async fn execute_step(&self, symbol: &str, step: &PlanStep) -> Result<String, ReconcileError> {
        let ack: ExchangeAck = match step {
            PlanStep::CancelOpenOrders => self.gateway.cancel_all_open_orders(symbol).await?,
            PlanStep::CloseAtMarket { side, quantity } | PlanStep::ReduceAtMarket { side, quantity } => {
                self.gateway
                    .place_market_order(symbol, *side, *quantity, true)
                    .await?
            }
            PlanStep::ConfirmFlat => return self.confirm_flat(symbol).await,
            PlanStep::SetLeverage { leverage } => self.gateway.set_leverage(symbol, *leverage).await?,
            PlanStep::OpenLimit {
                side,
                quantity,
                price,
                protection,
            } => {
                self.gateway
                    .place_limit_order(symbol, *side, *quantity, *price, false, *protection)
                    .await?
            }
            PlanStep::UpdateProtection { protection } => {
                self.gateway.set_position_protection(symbol, *protection).await?
            }
        };
        Ok(ack.to_string())
    }

    /// One re-read after the configured settle delay. A residual size fails the
    /// plan; the next reconciliation starts again from live state.
    async fn confirm_flat(&self, symbol: &str) -> Result<String, ReconcileError> {
        let delay = self.config.flat_confirm_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.positions.read(symbol).await? {
            None => Ok("flat".to_string()),
            Some(residual) => {
                warn!(symbol, size = %residual.size, side = %residual.side, "position not flat after close");
                Err(StateMismatchError {
                    symbol: symbol.to_string(),
                    observed: residual.size,
                    reason: "position not flat after market close".to_string(),
                }
                .into())
            }
        }
    }
}
