//! Filters and functions available to definition templates
//!
//! Every `{{ }}` expression is JSON-escaped, so string-producing filters
//! yield quoted data literals. Filters that emit ready-made YAML or JSON
//! text return safe strings to skip that escaping.

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};

fn invalid(message: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.to_string())
}

/// Convert a value to block YAML
///
/// Usage: {{ parameter.config | toyaml | indent(4) }}
pub fn toyaml(value: Value) -> Result<Value, Error> {
    let json: serde_json::Value = serde_json::to_value(&value).map_err(invalid)?;
    let yaml = serde_yaml::to_string(&json).map_err(invalid)?;
    Ok(Value::from_safe_string(
        yaml.trim_start_matches("---\n").trim_end().to_string(),
    ))
}

/// Render any value as a string literal
///
/// Usage: {{ parameter.port | quote }}
pub fn quote(value: Value) -> Value {
    let text = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    Value::from(text)
}

/// Base64 encode a string
///
/// Usage: {{ parameter.password | b64encode }}
#[must_use]
pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

/// Base64 decode a string
pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| invalid(format!("base64 decode error: {}", e)))?;

    String::from_utf8(decoded).map_err(|e| invalid(format!("UTF-8 decode error: {}", e)))
}

/// SHA-256 hex digest of a string
pub fn sha256(value: String) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

/// Truncate a string to at most `length` characters
///
/// Usage: {{ context.name | trunc(63) }}
pub fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(&prefix).unwrap_or(&value).to_string()
}

pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(&suffix).unwrap_or(&value).to_string()
}

/// Require a value to be present
///
/// An undefined or null value leaves the render non-concrete.
///
/// Usage: {{ parameter.host | required("host is required") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        let msg = message.unwrap_or_else(|| "required value is missing".to_string());
        Err(Error::new(ErrorKind::UndefinedError, msg))
    } else {
        Ok(value)
    }
}

/// Deep merge two mappings, the overlay wins
///
/// Usage: {{ merge(context.bdcLabels, {"app": context.name}) }}
pub fn merge(base: Value, overlay: Value) -> Result<Value, Error> {
    let mut base: serde_json::Value = serde_json::to_value(&base).map_err(invalid)?;
    let overlay: serde_json::Value = serde_json::to_value(&overlay).map_err(invalid)?;
    kdp_core::parameters::deep_merge(&mut base, &overlay);
    Ok(Value::from_serialize(&base))
}

/// Abort the render with a message
///
/// Usage: {{ fail("mode must be session or application") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(invalid(message))
}

/// Register everything above on an environment
pub fn register(env: &mut minijinja::Environment<'_>) {
    env.add_filter("toyaml", toyaml);
    env.add_filter("quote", quote);
    env.add_filter("b64encode", b64encode);
    env.add_filter("b64decode", b64decode);
    env.add_filter("sha256", sha256);
    env.add_filter("trunc", trunc);
    env.add_filter("trimprefix", trimprefix);
    env.add_filter("trimsuffix", trimsuffix);
    env.add_filter("required", required);
    env.add_filter("merge", merge);

    env.add_function("fail", fail);
    env.add_function("merge", merge);
}
