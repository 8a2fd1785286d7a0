//! Helpers for working with JSON values flowing between nodes

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// A JSON number that keeps integers exact until an operation needs a float
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    /// Read a number; booleans and strings are not numbers
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::from_number(n)),
            _ => None,
        }
    }

    pub fn from_number(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Int(i)
        } else {
            Self::Float(n.as_f64().unwrap_or(f64::NAN))
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Self::Int(i) => i == 0,
            Self::Float(f) => f == 0.0,
        }
    }

    /// Convert back to JSON; `None` for NaN and infinities
    pub fn to_value(self) -> Option<Value> {
        match self {
            Self::Int(i) => Some(Value::from(i)),
            Self::Float(f) => Number::from_f64(f).map(Value::Number),
        }
    }

    pub fn add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(b)
                .map(Self::Int)
                .unwrap_or(Self::Float(a as f64 + b as f64)),
            (a, b) => Self::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn sub(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_sub(b)
                .map(Self::Int)
                .unwrap_or(Self::Float(a as f64 - b as f64)),
            (a, b) => Self::Float(a.as_f64() - b.as_f64()),
        }
    }

    pub fn mul(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_mul(b)
                .map(Self::Int)
                .unwrap_or(Self::Float(a as f64 * b as f64)),
            (a, b) => Self::Float(a.as_f64() * b.as_f64()),
        }
    }

    /// True division, always a float
    pub fn div(self, other: Self) -> Self {
        Self::Float(self.as_f64() / other.as_f64())
    }

    /// Modulo whose sign follows the divisor
    pub fn rem(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) if b != 0 => {
                let r = a.wrapping_rem(b);
                if r != 0 && ((r < 0) != (b < 0)) {
                    Self::Int(r + b)
                } else {
                    Self::Int(r)
                }
            }
            (a, b) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                let r = a % b;
                if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                    Self::Float(r + b)
                } else {
                    Self::Float(r)
                }
            }
        }
    }

    pub fn pow(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(base), Self::Int(exp)) if (0..=u32::MAX as i64).contains(&exp) => base
                .checked_pow(exp as u32)
                .map(Self::Int)
                .unwrap_or(Self::Float((base as f64).powf(exp as f64))),
            (a, b) => Self::Float(a.as_f64().powf(b.as_f64())),
        }
    }

    pub fn abs(self) -> Self {
        match self {
            Self::Int(i) => i.checked_abs().map(Self::Int).unwrap_or(Self::Float((i as f64).abs())),
            Self::Float(f) => Self::Float(f.abs()),
        }
    }

    pub fn cmp_num(self, other: Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

/// Collect the numeric elements of a list, skipping everything else
pub fn numeric_elements(values: &[Value]) -> Vec<Num> {
    values.iter().filter_map(Num::from_value).collect()
}

/// Truthiness: null, false, zero and empty containers are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => !Num::from_number(n).is_zero(),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality with numbers compared by value, so `1 == 1.0`
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (Num::from_value(left), Num::from_value(right)) {
        (Some(a), Some(b)) => a.cmp_num(b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

/// Ordering between two values of the same kind; `None` when they are not comparable
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            Num::from_number(a).cmp_num(Num::from_number(b))
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Human-readable rendering: strings unquoted, everything else as JSON
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk a dotted path (`a.b.0.c`) through objects and arrays
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Human-readable name of a value's JSON kind
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
