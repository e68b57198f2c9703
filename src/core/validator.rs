// src/core/validator.rs
use crate::config::ReconcilerConfig;
use crate::error::ValidationError;
use crate::types::{Side, SizeSpec, TradingSignal};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Signal as produced by the analysis pipeline or the operator command parser.
/// Nothing here is trusted until `SignalValidator::validate` accepts it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalRequest {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub leverage: Option<Value>,
    #[serde(default)]
    pub size: Option<Value>,
    /// "ratio" (default) or "contracts".
    #[serde(default)]
    pub size_unit: Option<String>,
    #[serde(default)]
    pub entry_price: Option<Value>,
    #[serde(default)]
    pub stop_loss: Option<Value>,
    /// A single level or an array of levels.
    #[serde(default)]
    pub take_profit: Option<Value>,
}

pub struct SignalValidator {
    min_leverage: u32,
    max_leverage: u32,
}

impl SignalValidator {
    pub fn new(config: &ReconcilerConfig) -> Self {
        Self {
            min_leverage: config.min_leverage,
            max_leverage: config.max_leverage,
        }
    }

    /// Checks fields in declaration order and reports the first offender.
    /// Never fills in a default for a missing sizing parameter.
    pub fn validate(
        &self,
        symbol: &str,
        request: &SignalRequest,
    ) -> Result<TradingSignal, ValidationError> {
        if let Some(s) = &request.symbol {
            if s != symbol {
                return Err(ValidationError::Invalid {
                    field: "symbol",
                    reason: format!("signal is for {} but reconciling {}", s, symbol),
                });
            }
        }

        let side = match request.side.as_deref().map(str::trim) {
            None => return Err(ValidationError::Missing("side")),
            Some(s) if s.eq_ignore_ascii_case("long") => Side::Long,
            Some(s) if s.eq_ignore_ascii_case("short") => Side::Short,
            Some(s) => {
                return Err(ValidationError::Invalid {
                    field: "side",
                    reason: format!("`{}` is neither Long nor Short", s),
                })
            }
        };

        let leverage = self.leverage(required(&request.leverage, "leverage")?)?;

        let size = positive(required(&request.size, "size")?, "size")?;
        let size = match request.size_unit.as_deref().map(str::trim) {
            None | Some("ratio") => {
                if size > Decimal::ONE {
                    return Err(ValidationError::OutOfRange {
                        field: "size",
                        reason: format!("ratio {} exceeds 1", size),
                    });
                }
                SizeSpec::Ratio(size)
            }
            Some("contracts") => SizeSpec::Contracts(size),
            Some(other) => {
                return Err(ValidationError::Invalid {
                    field: "size_unit",
                    reason: format!("`{}` is neither ratio nor contracts", other),
                })
            }
        };

        let entry_price = positive(required(&request.entry_price, "entry_price")?, "entry_price")?;

        let stop_loss = match &request.stop_loss {
            None | Some(Value::Null) => None,
            Some(v) => {
                let sl = positive(v, "stop_loss")?;
                let wrong_side = match side {
                    Side::Long => sl >= entry_price,
                    Side::Short => sl <= entry_price,
                };
                if wrong_side {
                    return Err(ValidationError::OutOfRange {
                        field: "stop_loss",
                        reason: format!("{} is on the wrong side of entry {} for {}", sl, entry_price, side),
                    });
                }
                Some(sl)
            }
        };

        let take_profit = take_profit_levels(&request.take_profit, side, entry_price)?;

        Ok(TradingSignal {
            symbol: symbol.to_string(),
            side,
            leverage,
            size,
            entry_price,
            stop_loss,
            take_profit,
        })
    }

    fn leverage(&self, value: &Value) -> Result<u32, ValidationError> {
        let raw = numeric(value, "leverage")?;
        if raw.fract() != Decimal::ZERO {
            return Err(ValidationError::Invalid {
                field: "leverage",
                reason: format!("{} is not a whole number", raw),
            });
        }
        let out_of_range = || ValidationError::OutOfRange {
            field: "leverage",
            reason: format!(
                "{} outside [{}, {}]",
                raw, self.min_leverage, self.max_leverage
            ),
        };
        let leverage = raw.to_u32().ok_or_else(out_of_range)?;
        if leverage < self.min_leverage || leverage > self.max_leverage {
            return Err(out_of_range());
        }
        Ok(leverage)
    }
}

fn required<'a>(value: &'a Option<Value>, field: &'static str) -> Result<&'a Value, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::Missing(field)),
        Some(v) => Ok(v),
    }
}

/// Accepts JSON numbers and numeric strings.
fn numeric(value: &Value, field: &'static str) -> Result<Decimal, ValidationError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(ValidationError::Invalid {
                field,
                reason: format!("expected a number, got {}", other),
            })
        }
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| ValidationError::Invalid {
            field,
            reason: format!("`{}` is not a number", text),
        })
}

fn positive(value: &Value, field: &'static str) -> Result<Decimal, ValidationError> {
    let n = numeric(value, field)?;
    if n <= Decimal::ZERO {
        return Err(ValidationError::OutOfRange {
            field,
            reason: format!("{} must be greater than zero", n),
        });
    }
    Ok(n)
}

fn take_profit_levels(
    value: &Option<Value>,
    side: Side,
    entry_price: Decimal,
) -> Result<Vec<Decimal>, ValidationError> {
    let raw: Vec<&Value> = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    };

    let mut levels = Vec::with_capacity(raw.len());
    for item in raw {
        let tp = positive(item, "take_profit")?;
        let beyond_entry = match side {
            Side::Long => tp > entry_price,
            Side::Short => tp < entry_price,
        };
        if !beyond_entry {
            return Err(ValidationError::OutOfRange {
                field: "take_profit",
                reason: format!("{} is on the wrong side of entry {} for {}", tp, entry_price, side),
            });
        }
        if let Some(prev) = levels.last() {
            let ordered = match side {
                Side::Long => tp > *prev,
                Side::Short => tp < *prev,
            };
            if !ordered {
                return Err(ValidationError::Invalid {
                    field: "take_profit",
                    reason: "levels must move away from entry".to_string(),
                });
            }
        }
        levels.push(tp);
    }
    Ok(levels)
}
