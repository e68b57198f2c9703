// src/lib.rs
pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod types;
pub mod utils;

pub use crate::config::{AppConfig, ConflictPolicy, ReconcilerConfig};
pub use crate::core::notify::{ChannelSink, Notification, NotificationSink, StepEvent, TracingSink};
pub use crate::core::plan::{PlanCase, PlanStep};
pub use crate::core::reconciler::{ExecutedStep, PlanResult, Reconciler};
pub use crate::core::validator::SignalRequest;
pub use crate::error::{ErrorKind, OrderError, OrderErrorKind, ReconcileError};
