//! Dynamic element helpers
//!
//! Sequence elements are `serde_json::Value`s. This module defines the value
//! semantics the engine and the expression evaluator share:
//!
//! - **Truthiness** for predicates
//! - **Default equality** (strict, with numbers compared by value)
//! - **Ordering** for sorting and min/max
//! - **Runtime kinds** for `of_type` and `cast`

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Runtime kind of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// `null`
    Null,
    /// `true` / `false`
    Boolean,
    /// Any number
    Number,
    /// A number with no fractional part
    Integer,
    /// Text
    String,
    /// Ordered list of values
    Array,
    /// Key/value map
    Object,
}

impl ValueKind {
    /// Kind of a value. Numbers report `Number`; use [`ValueKind::matches`]
    /// to test for `Integer`.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Check whether a value is of this kind
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Integer => value.as_f64().map(|n| n.fract() == 0.0).unwrap_or(false),
            kind => *kind == Self::of(value),
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "null" => Some(Self::Null),
            "boolean" | "bool" => Some(Self::Boolean),
            "number" => Some(Self::Number),
            "integer" | "int" => Some(Self::Integer),
            "string" => Some(Self::String),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    /// Rank used to order values of different kinds
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean => write!(f, "boolean"),
            Self::Number => write!(f, "number"),
            Self::Integer => write!(f, "integer"),
            Self::String => write!(f, "string"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// Truthiness of a value when used as a predicate result
///
/// `null`, `false`, `0`, `NaN` and `""` are falsy; everything else,
/// including empty arrays and objects, is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Default equality
///
/// Structural equality, except that numbers compare by numeric value so
/// `1` and `1.0` are equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    match (x.as_i64(), y.as_i64()) {
        (Some(l), Some(r)) => l == r,
        _ => x.as_f64() == y.as_f64(),
    }
}

/// Total ordering used by sorting and min/max
///
/// Values of different kinds order by kind (null < boolean < number <
/// string < array < object). Arrays compare element-wise; objects compare
/// by length only.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                match compare_values(l, r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => ValueKind::rank(a).cmp(&ValueKind::rank(b)),
    }
}

/// Partial ordering for comparison operators in expressions
///
/// Only values of the same kind (numbers, strings, booleans) are comparable.
pub fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Some(compare_numbers(x, y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    match (x.as_i64(), y.as_i64()) {
        (Some(l), Some(r)) => l.cmp(&r),
        _ => {
            let l = x.as_f64().unwrap_or(f64::NAN);
            let r = y.as_f64().unwrap_or(f64::NAN);
            l.total_cmp(&r)
        }
    }
}

/// Build a number value, keeping integral results as integers
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Render a value for error messages
pub fn describe(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 64 {
        format!("{}...", text.chars().take(61).collect::<String>())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("a")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
    }

    #[test]
    fn test_values_equal_numbers() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
        assert!(!values_equal(&json!({"a": 1}), &json!({"b": 1})));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!("BNM"), &json!("FGH")), Ordering::Less);
        assert_eq!(compare_values(&json!(null), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1, 3])), Ordering::Less);
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(ValueKind::from_str("Number"), Some(ValueKind::Number));
        assert!(ValueKind::Integer.matches(&json!(4)));
        assert!(ValueKind::Integer.matches(&json!(4.0)));
        assert!(!ValueKind::Integer.matches(&json!(4.5)));
        assert!(ValueKind::Number.matches(&json!(4.5)));
        assert!(!ValueKind::String.matches(&json!(4)));
    }

    #[test]
    fn test_describe_truncates_on_char_boundaries() {
        let wide = json!(format!("ab{}", "中".repeat(25)));
        assert_eq!(describe(&wide), wide.to_string());

        let long = json!("中".repeat(100));
        let described = describe(&long);
        assert!(described.ends_with("..."));
        assert_eq!(described.chars().count(), 64);

        assert_eq!(describe(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn test_number_keeps_integers() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(3.5), json!(3.5));
    }
}
