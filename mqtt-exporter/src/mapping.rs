//! Mapping from decoded MQTT fields to Prometheus samples.

use serde_json::Value;
use thiserror::Error;

/// Raw string value that maps to `1.0`.
pub const STATE_ON: &str = "ON";

/// Raw string value that maps to `0.0`.
pub const STATE_OFF: &str = "OFF";

/// Errors produced while coercing a raw field value to a sample value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    /// The value is neither ON/OFF nor numeric.
    #[error("field '{field}' has non-numeric value {value}")]
    NotNumeric { field: String, value: String },
}

/// Coerce a raw field value into a gauge value.
///
/// - the exact string `"ON"` is `1.0`, `"OFF"` is `0.0`
/// - JSON numbers are taken as-is, booleans map to `1.0`/`0.0`
/// - strings are parsed as floats after trimming whitespace
///
/// Anything else (null, objects, arrays, other strings) is rejected.
pub fn coerce(field: &str, raw: &Value) -> Result<f64, CoercionError> {
    let not_numeric = || CoercionError::NotNumeric {
        field: field.to_string(),
        value: raw.to_string(),
    };

    match raw {
        Value::String(s) if s == STATE_ON => Ok(1.0),
        Value::String(s) if s == STATE_OFF => Ok(0.0),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| not_numeric()),
        Value::Number(n) => n.as_f64().ok_or_else(not_numeric),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(not_numeric()),
    }
}

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// Invalid characters are replaced with underscores one for one and a
/// leading digit gets an underscore in front. Names that are already valid
/// come back unchanged.
pub fn sanitize_metric_name(name: &str) -> String {
    if name.is_empty() {
        return "unnamed".to_string();
    }

    let mut result = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
    }

    for c in name.chars() {
        if is_metric_name_char(c) {
            result.push(c);
        } else {
            result.push('_');
        }
    }

    result
}

/// Build the full metric name for a payload field.
///
/// Format: `{prefix}{field}`, sanitized as a whole.
pub fn build_metric_name(prefix: &str, field: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + field.len());
    name.push_str(prefix);
    name.push_str(field);
    sanitize_metric_name(&name)
}

/// Escape a label value for the text exposition format.
///
/// Backslash, double quote and line feed are the only characters that need
/// escaping inside a quoted label value.
pub fn escape_label_value(value: &str) -> String {
    if !value.contains(['\\', '"', '\n']) {
        return value.to_string();
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Check whether a string can be used as a metric name prefix.
///
/// An empty prefix is allowed.
pub fn is_valid_metric_prefix(prefix: &str) -> bool {
    !prefix.starts_with(|c: char| c.is_ascii_digit()) && prefix.chars().all(is_metric_name_char)
}

/// Check whether a string is a usable Prometheus label name.
///
/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*` and names starting with
/// `__` are reserved.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

fn is_metric_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}
