use serde_json::{Map, Number, Value};

use crate::database::error::{invalid_argument, DatabaseResult};
use crate::database::tree::{child_of, data_of};

pub(crate) const SERVER_VALUE_KEY: &str = ".sv";

/// Placeholder replaced with the server's clock when the write is applied.
pub fn server_timestamp() -> Value {
    serde_json::json!({ ".sv": "timestamp" })
}

/// Placeholder that atomically adds `delta` to the stored number, treating a
/// missing or non-numeric value as zero.
pub fn increment(delta: f64) -> Value {
    serde_json::json!({
        ".sv": {
            "increment": delta,
        }
    })
}

pub(crate) fn contains_server_value(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(SERVER_VALUE_KEY) || map.values().any(contains_server_value)
        }
        Value::Array(items) => items.iter().any(contains_server_value),
        _ => false,
    }
}

/// Replaces every placeholder in `value`. `current` is the data stored at the
/// same location, used by `increment`.
pub(crate) fn resolve_server_values(
    value: Value,
    current: Option<&Value>,
    now_millis: i64,
) -> DatabaseResult<Value> {
    match value {
        Value::Object(mut map) => {
            if let Some(placeholder) = map.remove(SERVER_VALUE_KEY) {
                return resolve_placeholder(placeholder, current.map(data_of), now_millis);
            }
            let mut resolved = Map::with_capacity(map.len());
            for (key, child) in map {
                let child_current = current.and_then(|curr| child_of(curr, &key));
                resolved.insert(
                    key,
                    resolve_server_values(child, child_current, now_millis)?,
                );
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, child)| {
                let child_current = current.and_then(|curr| child_of(curr, &index.to_string()));
                resolve_server_values(child, child_current, now_millis)
            })
            .collect::<DatabaseResult<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

/// Checks that `placeholder` (the payload under `.sv`) is one this module can
/// resolve, so malformed writes are rejected before anything is applied.
pub(crate) fn validate_placeholder(placeholder: &Value) -> DatabaseResult<()> {
    match placeholder {
        Value::String(token) if token == "timestamp" => Ok(()),
        Value::Object(map) if map.len() == 1 => match map.get("increment") {
            Some(delta) if delta.is_number() => Ok(()),
            Some(_) => Err(invalid_argument("ServerValue increment delta must be numeric")),
            None => Err(invalid_argument("Unsupported server value placeholder")),
        },
        _ => Err(invalid_argument("Unsupported server value placeholder")),
    }
}

fn resolve_placeholder(
    placeholder: Value,
    current: Option<&Value>,
    now_millis: i64,
) -> DatabaseResult<Value> {
    match placeholder {
        Value::String(token) if token == "timestamp" => Ok(Value::Number(Number::from(now_millis))),
        Value::Object(mut map) => {
            let delta = map
                .remove("increment")
                .ok_or_else(|| invalid_argument("Unsupported server value placeholder"))?;
            let delta = delta
                .as_f64()
                .ok_or_else(|| invalid_argument("ServerValue increment delta must be numeric"))?;
            let base = current.and_then(Value::as_f64).unwrap_or(0.0);
            let total = base + delta;
            if total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
                return Ok(Value::Number(Number::from(total as i64)));
            }
            Number::from_f64(total)
                .map(Value::Number)
                .ok_or_else(|| invalid_argument("ServerValue increment produced an invalid number"))
        }
        _ => Err(invalid_argument("Unsupported server value placeholder")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamp_uses_supplied_clock() {
        let resolved =
            resolve_server_values(json!({"at": server_timestamp()}), None, 1_700_000_000_000)
                .unwrap();
        assert_eq!(resolved, json!({"at": 1_700_000_000_000i64}));
    }

    #[test]
    fn increment_adds_to_current_value() {
        let current = json!({"count": 4});
        let resolved =
            resolve_server_values(json!({"count": increment(2.0)}), Some(&current), 0).unwrap();
        assert_eq!(resolved, json!({"count": 6}));

        let fresh = resolve_server_values(increment(1.5), None, 0).unwrap();
        assert_eq!(fresh, json!(1.5));
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = resolve_server_values(json!({".sv": "bogus"}), None, 0).unwrap_err();
        assert_eq!(err.code_str(), "database/invalid-argument");
    }

    #[test]
    fn placeholder_shape_is_checked_up_front() {
        assert!(validate_placeholder(&json!("timestamp")).is_ok());
        assert!(validate_placeholder(&json!({"increment": 2})).is_ok());
        assert!(validate_placeholder(&json!("bogus")).is_err());
        assert!(validate_placeholder(&json!({"increment": 1, "extra": 1})).is_err());
        assert!(validate_placeholder(&json!({"increment": "1"})).is_err());
    }

    #[test]
    fn detects_nested_placeholders() {
        assert!(contains_server_value(&json!({"a": [1, {"b": server_timestamp()}]})));
        assert!(!contains_server_value(&json!({"a": [1, 2]})));
    }
}
