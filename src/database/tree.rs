//! Helpers over the JSON tree representation shared by snapshots and the
//! in-memory native module.
//!
//! A node with a priority is stored as `{ ".value": data, ".priority": p }`.
//! Writes may also carry `.priority` next to ordinary children;
//! [`normalize_priorities`] folds those into the stored wrapper before they
//! reach the tree.

use serde_json::{Map, Value};

use crate::database::error::{invalid_argument, DatabaseResult};
use crate::database::path::validate_key;
use crate::database::server_value::{validate_placeholder, SERVER_VALUE_KEY};

pub(crate) const VALUE_KEY: &str = ".value";
pub(crate) const PRIORITY_KEY: &str = ".priority";

pub(crate) fn pack_with_priority(value: Value, priority: Value) -> Value {
    if priority.is_null() {
        return value;
    }
    let mut map = Map::with_capacity(2);
    map.insert(VALUE_KEY.to_string(), value);
    map.insert(PRIORITY_KEY.to_string(), priority);
    Value::Object(map)
}

/// The data part of a node, ignoring its priority wrapper.
pub(crate) fn data_of(value: &Value) -> &Value {
    match value {
        Value::Object(map) if map.contains_key(PRIORITY_KEY) => {
            map.get(VALUE_KEY).unwrap_or(&Value::Null)
        }
        other => other,
    }
}

pub(crate) fn priority_of(value: &Value) -> Value {
    value
        .as_object()
        .and_then(|map| map.get(PRIORITY_KEY))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Removes every priority wrapper, recursively.
pub(crate) fn strip_priorities(value: &Value) -> Value {
    match data_of(value) {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| *key != PRIORITY_KEY)
                .map(|(key, child)| (key.clone(), strip_priorities(child)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_priorities).collect()),
        other => other.clone(),
    }
}

pub(crate) fn child_of<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match data_of(value) {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    }
}

pub(crate) fn get_at<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(root, |current, segment| child_of(current, segment))
}

pub(crate) fn value_at(root: &Value, path: &[String]) -> Value {
    get_at(root, path).cloned().unwrap_or(Value::Null)
}

/// Direct children in key order. Arrays are treated as objects keyed by index.
pub(crate) fn children(value: &Value) -> Vec<(String, Value)> {
    match data_of(value) {
        Value::Object(map) => map
            .iter()
            .map(|(key, child)| (key.clone(), child.clone()))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, child)| !child.is_null())
            .map(|(index, child)| (index.to_string(), child.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Writes `value` at `path`, creating intermediate objects. Writing `null`
/// deletes the node and prunes parents left empty.
pub(crate) fn set_at(root: &mut Value, path: &[String], value: Value) {
    if value.is_null() {
        delete_at(root, path);
        return;
    }
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        current = ensure_object(current)
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current).insert(last.clone(), value);
}

pub(crate) fn delete_at(root: &mut Value, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        *root = Value::Null;
        return;
    };
    if let Some(Value::Object(map)) = get_data_mut(root, parents) {
        map.remove(last);
    }
    prune_empty(root, parents);
}

fn prune_empty(root: &mut Value, path: &[String]) {
    let mut depth = path.len();
    while depth > 0 {
        let is_empty = matches!(
            get_at(root, &path[..depth]).map(data_of),
            Some(Value::Object(map)) if map.is_empty()
        );
        if !is_empty {
            break;
        }
        if let Some(Value::Object(parent)) = get_data_mut(root, &path[..depth - 1]) {
            parent.remove(&path[depth - 1]);
        }
        depth -= 1;
    }
    if matches!(data_of(root), Value::Object(map) if map.is_empty()) {
        *root = Value::Null;
    }
}

fn get_data_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = unwrap_priority_mut(root);
    for segment in path {
        current = match current {
            Value::Object(map) => unwrap_priority_mut(map.get_mut(segment)?),
            _ => return None,
        };
    }
    Some(current)
}

fn unwrap_priority_mut(value: &mut Value) -> &mut Value {
    let wrapped = matches!(value, Value::Object(map) if map.contains_key(PRIORITY_KEY));
    if wrapped {
        if let Value::Object(map) = value {
            return map.entry(VALUE_KEY).or_insert(Value::Null);
        }
    }
    value
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    let value = unwrap_priority_mut(value);
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Rewrites `.priority` and `.value` keys supplied with a write into the
/// stored wrapper form, recursively. A priority with no data collapses to null.
pub(crate) fn normalize_priorities(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            let priority = map.remove(PRIORITY_KEY).unwrap_or(Value::Null);
            let data = match map.remove(VALUE_KEY) {
                Some(inner) => normalize_priorities(inner),
                None if map.is_empty() && !priority.is_null() => Value::Null,
                None => Value::Object(
                    map.into_iter()
                        .map(|(key, child)| (key, normalize_priorities(child)))
                        .collect(),
                ),
            };
            if data.is_null() {
                return Value::Null;
            }
            pack_with_priority(data, priority)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_priorities).collect()),
        other => other,
    }
}

/// Rejects values that cannot be stored, anywhere inside `value`: invalid
/// keys, malformed server value placeholders, and `.value` mixed with children.
pub(crate) fn validate_value(value: &Value) -> DatabaseResult<()> {
    match value {
        Value::Object(map) => {
            if let Some(placeholder) = map.get(SERVER_VALUE_KEY) {
                if map.len() != 1 {
                    return Err(invalid_argument(
                        "Server value placeholders cannot have sibling keys",
                    ));
                }
                return validate_placeholder(placeholder);
            }
            if map.contains_key(VALUE_KEY)
                && map.keys().any(|key| key != VALUE_KEY && key != PRIORITY_KEY)
            {
                return Err(invalid_argument(
                    "An object with a .value key may only also contain .priority",
                ));
            }
            for (key, child) in map {
                match key.as_str() {
                    PRIORITY_KEY => validate_priority(child)?,
                    VALUE_KEY => validate_value(child)?,
                    _ => {
                        validate_key(key)?;
                        validate_value(child)?;
                    }
                }
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(validate_value),
        Value::Number(number) if number.as_f64().is_some_and(|n| !n.is_finite()) => {
            Err(invalid_argument("Numbers stored in the database must be finite"))
        }
        _ => Ok(()),
    }
}

pub(crate) fn validate_priority(priority: &Value) -> DatabaseResult<()> {
    match priority {
        Value::Null | Value::Number(_) | Value::String(_) => Ok(()),
        _ => Err(invalid_argument("Priority must be a string, number, or null")),
    }
}
