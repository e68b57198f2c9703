// src/config.rs

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    // Paper exchange unless explicitly enabled
    #[serde(default)]
    pub live_trading: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            base_url: default_base_url(),
            recv_window_ms: default_recv_window(),
            request_timeout_ms: default_request_timeout(),
            live_trading: false,
        }
    }
}

impl ExchangeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// What the Signal Serializer does with a second request for a busy symbol.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Wait,
    Reject,
}

/// Immutable thresholds and exchange bounds handed to the Reconciler at construction.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub min_order_size: Decimal,
    pub max_order_size: Decimal,
    pub quantity_step: Decimal,
    pub price_tick: Decimal,
    /// Size differences below this are treated as converged.
    pub min_adjust_size: Decimal,
    /// Leverage differences at or above this force a close and reopen.
    pub leverage_threshold: u32,
    pub min_leverage: u32,
    pub max_leverage: u32,
    pub quote_asset: String,
    pub conflict_policy: ConflictPolicy,
    pub flat_confirm_delay_ms: u64,
    pub sync_protection_when_converged: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            min_order_size: Decimal::new(1, 3),
            max_order_size: Decimal::from(100),
            quantity_step: Decimal::new(1, 3),
            price_tick: Decimal::new(1, 1),
            min_adjust_size: Decimal::new(1, 3),
            leverage_threshold: 3,
            min_leverage: 1,
            max_leverage: 100,
            quote_asset: "USDT".to_string(),
            conflict_policy: ConflictPolicy::Wait,
            flat_confirm_delay_ms: 500,
            sync_protection_when_converged: true,
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Message(format!("reconciler: {}", msg)));

        if self.quantity_step <= Decimal::ZERO {
            return fail("quantity_step must be positive");
        }
        if self.price_tick < Decimal::ZERO {
            return fail("price_tick must not be negative");
        }
        if self.min_order_size <= Decimal::ZERO {
            return fail("min_order_size must be positive");
        }
        if self.min_order_size > self.max_order_size {
            return fail("min_order_size exceeds max_order_size");
        }
        if self.min_adjust_size < Decimal::ZERO {
            return fail("min_adjust_size must not be negative");
        }
        if self.leverage_threshold == 0 {
            return fail("leverage_threshold must be at least 1");
        }
        if self.min_leverage == 0 || self.min_leverage > self.max_leverage {
            return fail("leverage bounds must satisfy 1 <= min_leverage <= max_leverage");
        }
        Ok(())
    }

    pub fn flat_confirm_delay(&self) -> Duration {
        Duration::from_millis(self.flat_confirm_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DriverConfig {
    pub symbol: String,
    pub signal_file: String,
    pub poll_interval_secs: u64,
    pub log_dir: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            signal_file: "signal.json".to_string(),
            poll_interval_secs: 60,
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub driver: DriverConfig,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.reconciler.validate()?;
        Ok(config)
    }
}

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_recv_window() -> u64 {
    5_000
}

fn default_request_timeout() -> u64 {
    10_000
}
