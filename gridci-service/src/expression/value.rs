// Expression Values
// Coercion, truthiness and comparison rules for JSON values in expressions

use serde_json::Value;

use std::cmp::Ordering;

/// Expression semantics layered over `serde_json::Value`
pub trait ValueExt {
    /// `null`, `false`, `0`, `-0`, `NaN` and `''` are falsy
    fn is_truthy(&self) -> bool;

    /// String form used when a value is interpolated into text
    fn to_display_string(&self) -> String;

    /// Numeric coercion used by mixed-type comparisons
    fn to_number(&self) -> f64;

    /// Loose equality: case-insensitive strings, numeric coercion across types
    fn loose_eq(&self, other: &Value) -> bool;

    /// Ordering for `<`, `<=`, `>`, `>=`; `None` when either side is NaN
    fn loose_cmp(&self, other: &Value) -> Option<Ordering>;
}

impl ValueExt for Value {
    fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string_pretty(self).unwrap_or_default()
            }
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else if let Some(hex) = trimmed.strip_prefix("0x") {
                    i64::from_str_radix(hex, 16)
                        .map(|v| v as f64)
                        .unwrap_or(f64::NAN)
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(_) | Value::Object(_) => f64::NAN,
        }
    }

    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
            (Value::Number(_), Value::Number(_)) => self.to_number() == other.to_number(),
            (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                self == other
            }
            (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
                false
            }
            _ => {
                let (a, b) = (self.to_number(), other.to_number());
                !a.is_nan() && !b.is_nan() && a == b
            }
        }
    }

    fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        if let (Value::String(a), Value::String(b)) = (self, other) {
            return Some(a.to_lowercase().cmp(&b.to_lowercase()));
        }
        self.to_number().partial_cmp(&other.to_number())
    }
}

/// Whole numbers print without a fractional part
fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

/// Build a JSON number from an `f64`, mapping NaN and infinities to null
pub fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
