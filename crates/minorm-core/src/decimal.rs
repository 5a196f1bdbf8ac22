//! Exact decimal values backed by `rust_decimal`.
//!
//! Decimals are never routed through floating point. Two decimals are equal
//! when they denote the same number, regardless of scale: `10.50 == 10.5`.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::row::FromValue;
use crate::value::Value;
use rust_decimal::Decimal as WrappedDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An exact decimal number.
///
/// The scale is kept as parsed, so `10.50` displays and binds as `10.50`;
/// equality ignores it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Decimal(WrappedDecimal);

impl Decimal {
    /// Parse a decimal from text such as `-12.340`, `7` or `1.5E+3`.
    pub fn parse(text: &str) -> Result<Self> {
        parse_wrapped(text).map(Self).ok_or_else(|| {
            Error::Type(TypeError {
                expected: "decimal number",
                actual: format!("'{}'", text),
                column: None,
                rust_type: Some("Decimal"),
            })
        })
    }

    /// Number of digits after the decimal point, as parsed.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Canonical text: no sign on zero, no trailing fraction zeros.
    pub fn normalized(&self) -> String {
        canonical(self.0).to_string()
    }
}

fn parse_wrapped(text: &str) -> Option<WrappedDecimal> {
    let text = text.trim();
    if text.contains(['e', 'E']) {
        WrappedDecimal::from_scientific(text).ok()
    } else {
        WrappedDecimal::from_str_exact(text).ok()
    }
}

fn canonical(value: WrappedDecimal) -> WrappedDecimal {
    if value.is_zero() {
        WrappedDecimal::ZERO
    } else {
        value.normalize()
    }
}

/// Returns the canonical rendering of `text`, or `None` if it is not a
/// decimal literal.
pub(crate) fn normalize(text: &str) -> Option<String> {
    parse_wrapped(text).map(|d| canonical(d).to_string())
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Decimal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Decimal {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Decimal> for String {
    fn from(value: Decimal) -> Self {
        value.to_string()
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        Self(WrappedDecimal::from(v))
    }
}

impl From<WrappedDecimal> for Decimal {
    fn from(v: WrappedDecimal) -> Self {
        Self(v)
    }
}

impl From<Decimal> for WrappedDecimal {
    fn from(v: Decimal) -> Self {
        v.0
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v.to_string())
    }
}

impl FromValue for Decimal {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Decimal(s) | Value::Text(s) => Decimal::parse(s),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                Ok(Decimal::from(value.as_i64().unwrap_or_default()))
            }
            // Engines with numeric affinity hand decimals back as doubles.
            Value::Double(v) if v.is_finite() => Decimal::parse(&v.to_string()),
            Value::Float(v) if v.is_finite() => Decimal::parse(&v.to_string()),
            _ => Err(Error::Type(TypeError {
                expected: "decimal",
                actual: value.type_name().to_string(),
                column: None,
                rust_type: Some("Decimal"),
            })),
        }
    }
}
