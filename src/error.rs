// src/error.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reason code attached to a failed exchange call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderErrorKind {
    Auth,
    RateLimited,
    MinNotional,
    Rejected,
    Timeout,
    Transport,
    Decode,
}

impl fmt::Display for OrderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderErrorKind::Auth => "auth",
            OrderErrorKind::RateLimited => "rate-limited",
            OrderErrorKind::MinNotional => "min-notional",
            OrderErrorKind::Rejected => "rejected",
            OrderErrorKind::Timeout => "timeout",
            OrderErrorKind::Transport => "transport",
            OrderErrorKind::Decode => "decode",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} error (code {code:?}): {message}")]
pub struct OrderError {
    pub kind: OrderErrorKind,
    pub code: Option<i64>,
    pub message: String,
}

impl OrderError {
    pub fn new(kind: OrderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(kind: OrderErrorKind, code: i64, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(OrderErrorKind::Timeout, message)
    }

    /// Transient failures that are safe to resend.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            OrderErrorKind::RateLimited | OrderErrorKind::Timeout | OrderErrorKind::Transport
        )
    }
}

impl From<reqwest::Error> for OrderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OrderError::timeout(e.to_string())
        } else if e.is_decode() {
            OrderError::new(OrderErrorKind::Decode, e.to_string())
        } else {
            OrderError::new(OrderErrorKind::Transport, e.to_string())
        }
    }
}

impl From<serde_json::Error> for OrderError {
    fn from(e: serde_json::Error) -> Self {
        OrderError::new(OrderErrorKind::Decode, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("field `{field}` out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Missing(field) => field,
            ValidationError::Invalid { field, .. } => field,
            ValidationError::OutOfRange { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("computed quantity {0} is not positive")]
    NonPositive(Decimal),
    #[error("quantity {quantity} below minimum {min} after rounding")]
    BelowMinimum { quantity: Decimal, min: Decimal },
    #[error("entry price {0} is not positive")]
    InvalidPrice(Decimal),
    #[error("quantity out of range sizing against entry price {0}")]
    Overflow(Decimal),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{symbol}: {reason} (observed size {observed})")]
pub struct StateMismatchError {
    pub symbol: String,
    pub observed: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("sizing failed: {0}")]
    Sizing(#[from] SizingError),
    #[error("order failed: {0}")]
    Order(#[from] OrderError),
    #[error("state mismatch: {0}")]
    StateMismatch(#[from] StateMismatchError),
    #[error("reconciliation already in flight for {0}")]
    Busy(String),
}

/// Flat tag surfaced to callers in `PlanResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Sizing,
    Order(OrderErrorKind),
    StateMismatch,
    Busy,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Validation(_) => ErrorKind::Validation,
            ReconcileError::Sizing(_) => ErrorKind::Sizing,
            ReconcileError::Order(e) => ErrorKind::Order(e.kind),
            ReconcileError::StateMismatch(_) => ErrorKind::StateMismatch,
            ReconcileError::Busy(_) => ErrorKind::Busy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(OrderError::timeout("slow").is_retryable());
        assert!(OrderError::new(OrderErrorKind::RateLimited, "429").is_retryable());
        assert!(!OrderError::new(OrderErrorKind::Auth, "expired").is_retryable());
        assert!(!OrderError::with_code(OrderErrorKind::MinNotional, 110094, "too small").is_retryable());
    }

    #[test]
    fn reconcile_error_kind_carries_order_reason() {
        let err: ReconcileError = OrderError::new(OrderErrorKind::Rejected, "nope").into();
        assert_eq!(err.kind(), ErrorKind::Order(OrderErrorKind::Rejected));
        let err: ReconcileError = ValidationError::Missing("side").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
