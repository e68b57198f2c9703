// src/core/notify.rs
use crate::core::reconciler::PlanResult;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// One executed plan step as reported to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEvent {
    pub symbol: String,
    pub action: &'static str,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Notification {
    Step(StepEvent),
    Finished { symbol: String, result: PlanResult },
}

/// Receives structured events; formatting and delivery are up to the sink.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: Notification);
}

/// Renders events as log records.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: Notification) {
        match event {
            Notification::Step(step) => info!(
                symbol = %step.symbol,
                step = step.action,
                qty = ?step.quantity,
                price = ?step.price,
                response = %step.response,
                "plan step executed"
            ),
            Notification::Finished { symbol, result } if result.success => info!(
                symbol = %symbol,
                case = ?result.case,
                steps = result.steps_executed.len(),
                "✅ reconciliation complete"
            ),
            Notification::Finished { symbol, result } => error!(
                symbol = %symbol,
                case = ?result.case,
                steps = result.steps_executed.len(),
                error = ?result.error,
                detail = result.error_detail.as_deref().unwrap_or(""),
                last_response = result.last_response.as_deref().unwrap_or(""),
                "⚠️ reconciliation aborted"
            ),
        }
    }
}

/// Forwards events to another task, e.g. a chat notifier.
pub struct ChannelSink {
    sender: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: Notification) {
        match self.sender.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Notification channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Notification channel closed! Receiver is likely dead.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(action: &'static str) -> Notification {
        Notification::Step(StepEvent {
            symbol: "BTCUSDT".into(),
            action,
            quantity: None,
            price: None,
            response: "accepted".into(),
        })
    }

    #[test]
    fn channel_sink_forwards_and_survives_full_or_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);

        sink.notify(step("set_leverage"));
        sink.notify(step("open_limit")); // full, dropped
        assert_eq!(rx.try_recv().unwrap(), step("set_leverage"));
        assert!(rx.try_recv().is_err());

        drop(rx);
        sink.notify(step("confirm_flat"));
    }
}
