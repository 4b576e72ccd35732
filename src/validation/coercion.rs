//! Field coercion: turns a raw cell into a JSON value of the field's type.
//!
//! Empty cells follow the policy precedence (skip, then null, then default)
//! before any type conversion happens. Pure; no I/O.

use serde_json::{Number, Value};

use crate::model::{CoercionPolicy, DefaultValues, FieldSpec, FieldType};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Tokens (lowercase) that coerce to `true`.
pub const TRUE_TOKENS: &[&str] = &["true", "yes", "1", "y"];

/// Tokens (lowercase) that coerce to `false`.
pub const FALSE_TOKENS: &[&str] = &["false", "no", "0", "n"];

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of coercing one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    Value(Value),
    /// The field must not appear in the record at all.
    Omitted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Coercion
// ─────────────────────────────────────────────────────────────────────────────

/// Coerces a raw cell for `field`. `None` is an absent cell (short row).
pub fn coerce(
    field: &FieldSpec,
    raw: Option<&str>,
    defaults: &DefaultValues,
    policy: &CoercionPolicy,
) -> Coerced {
    let default = defaults.get(&field.name);

    let is_empty = raw.map_or(true, str::is_empty);
    let value: Option<&str> = if is_empty {
        if policy.skip_empty_values {
            return Coerced::Omitted;
        }
        if policy.convert_empty_to_null {
            return Coerced::Value(Value::Null);
        }
        match default {
            Some(d) => Some(d),
            None => raw,
        }
    } else {
        raw
    };

    match field.field_type {
        FieldType::Number => Coerced::Value(coerce_number(value, default, policy)),
        FieldType::Boolean => Coerced::Value(coerce_boolean(value, default)),
        FieldType::String | FieldType::Other(_) => match value {
            Some(s) => Coerced::Value(Value::String(s.to_string())),
            None => Coerced::Omitted,
        },
    }
}

fn coerce_number(value: Option<&str>, default: Option<&str>, policy: &CoercionPolicy) -> Value {
    if let Some(n) = value.and_then(parse_number) {
        return n;
    }
    if policy.convert_empty_numbers_to_zero {
        return Value::Number(Number::from(0));
    }
    default.and_then(parse_number).unwrap_or(Value::Null)
}

fn coerce_boolean(value: Option<&str>, default: Option<&str>) -> Value {
    if let Some(b) = value.and_then(parse_boolean) {
        return Value::Bool(b);
    }
    match default {
        None => Value::Null,
        Some(d) => Value::Bool(parse_boolean(d).unwrap_or(false)),
    }
}

/// Parses a trimmed numeric literal. Empty, `NaN`, and infinities fail.
/// Integral values within `i64`/`u64` range become JSON integers; integer
/// literals beyond that are kept as strings so no digits are lost.
pub fn parse_number(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::Number(Number::from(i)));
    }
    if let Ok(u) = trimmed.parse::<u64>() {
        return Some(Value::Number(Number::from(u)));
    }
    if is_integer_literal(trimmed) {
        return Some(Value::String(trimmed.to_string()));
    }
    let f = trimmed.parse::<f64>().ok().filter(|f| f.is_finite())?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        return Some(Value::Number(Number::from(f as i64)));
    }
    Number::from_f64(f).map(Value::Number)
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Case-insensitive match against the boolean token sets.
pub fn parse_boolean(raw: &str) -> Option<bool> {
    let lower = raw.trim().to_ascii_lowercase();
    if TRUE_TOKENS.contains(&lower.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
