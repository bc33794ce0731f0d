//! Query evaluation and event diffing for the in-memory module.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::database::modifiers::{Bound, Limit, OrderBy, QueryModifiers};
use crate::database::native::{EventType, NativeEvent, NativeSnapshot};
use crate::database::tree::{children, data_of, get_at, priority_of};

/// What a query observes at one location.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct QueryView {
    pub(crate) value: Value,
    pub(crate) children: Vec<(String, Value)>,
}

impl QueryView {
    pub(crate) fn snapshot(&self) -> NativeSnapshot {
        NativeSnapshot {
            value: self.value.clone(),
            child_keys: self.children.iter().map(|(key, _)| key.clone()).collect(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.children.iter().position(|(child, _)| child == key)
    }

    fn previous_key(&self, index: usize) -> Option<String> {
        index
            .checked_sub(1)
            .map(|previous| self.children[previous].0.clone())
    }
}

pub(crate) fn query_view(node: &Value, modifiers: &QueryModifiers) -> QueryView {
    let order = modifiers.effective_order();
    let mut entries = children(node);
    entries.sort_by(|(left_key, left), (right_key, right)| {
        compare_children(&order, left_key, left, right_key, right)
    });
    if modifiers.is_default() {
        return QueryView {
            value: node.clone(),
            children: entries,
        };
    }

    entries.retain(|(key, child)| {
        modifiers
            .start()
            .map_or(true, |bound| passes_start(&order, key, child, bound))
            && modifiers
                .end()
                .map_or(true, |bound| passes_end(&order, key, child, bound))
    });
    match modifiers.limit() {
        Some(Limit::First(count)) => entries.truncate(count as usize),
        Some(Limit::Last(count)) => {
            let skip = entries.len().saturating_sub(count as usize);
            entries.drain(..skip);
        }
        None => {}
    }

    let value = if entries.is_empty() {
        Value::Null
    } else {
        Value::Object(entries.iter().cloned().collect::<Map<_, _>>())
    };
    QueryView {
        value,
        children: entries,
    }
}

pub(crate) fn view_at(root: &Value, path: &[String], modifiers: &QueryModifiers) -> QueryView {
    let node = get_at(root, path).cloned().unwrap_or(Value::Null);
    query_view(&node, modifiers)
}

/// Events `event` produces when a location moves from `old` to `new`, in
/// delivery order: removed, added, moved, changed, value.
pub(crate) fn diff_events(
    event: EventType,
    path: &[String],
    old: Option<&QueryView>,
    new: &QueryView,
) -> Vec<NativeEvent> {
    if event == EventType::Value {
        if old.is_some_and(|old| old.value == new.value) {
            return Vec::new();
        }
        return vec![NativeEvent {
            event,
            path: path.to_vec(),
            snapshot: new.snapshot(),
            previous_child: None,
        }];
    }

    let empty = QueryView {
        value: Value::Null,
        children: Vec::new(),
    };
    let old = old.unwrap_or(&empty);
    let child_event = |key: &str, value: &Value, previous: Option<String>| {
        let mut child_path = path.to_vec();
        child_path.push(key.to_string());
        NativeEvent {
            event,
            path: child_path,
            snapshot: QueryView {
                value: value.clone(),
                children: children(value),
            }
            .snapshot(),
            previous_child: previous,
        }
    };

    match event {
        EventType::ChildRemoved => old
            .children
            .iter()
            .filter(|(key, _)| new.position(key).is_none())
            .map(|(key, value)| child_event(key, value, None))
            .collect(),
        EventType::ChildAdded => new
            .children
            .iter()
            .enumerate()
            .filter(|(_, (key, _))| old.position(key).is_none())
            .map(|(index, (key, value))| child_event(key, value, new.previous_key(index)))
            .collect(),
        EventType::ChildChanged => new
            .children
            .iter()
            .enumerate()
            .filter(|(_, (key, value))| {
                old.position(key)
                    .is_some_and(|position| old.children[position].1 != *value)
            })
            .map(|(index, (key, value))| child_event(key, value, new.previous_key(index)))
            .collect(),
        EventType::ChildMoved => {
            let kept = |view: &QueryView| -> Vec<String> {
                view.children
                    .iter()
                    .filter(|(key, _)| old.position(key).is_some() && new.position(key).is_some())
                    .map(|(key, _)| key.clone())
                    .collect()
            };
            let old_order = kept(old);
            let new_order = kept(new);
            new.children
                .iter()
                .enumerate()
                .filter(|(_, (key, value))| {
                    let Some(old_position) = old.position(key) else {
                        return false;
                    };
                    old.children[old_position].1 != *value
                        && old_order.iter().position(|k| k == key)
                            != new_order.iter().position(|k| k == key)
                })
                .map(|(index, (key, value))| child_event(key, value, new.previous_key(index)))
                .collect()
        }
        EventType::Value => Vec::new(),
    }
}

fn compare_children(
    order: &OrderBy,
    left_key: &str,
    left: &Value,
    right_key: &str,
    right: &Value,
) -> Ordering {
    let primary = match order {
        OrderBy::Key => Ordering::Equal,
        OrderBy::Priority => compare_priorities(&priority_of(left), &priority_of(right)),
        OrderBy::Value => compare_values(data_of(left), data_of(right)),
        OrderBy::Child(path) => compare_values(&child_value(left, path), &child_value(right, path)),
    };
    primary.then_with(|| compare_keys(left_key, right_key))
}

fn sort_value(order: &OrderBy, key: &str, node: &Value) -> Value {
    match order {
        OrderBy::Key => Value::String(key.to_string()),
        OrderBy::Priority => priority_of(node),
        OrderBy::Value => data_of(node).clone(),
        OrderBy::Child(path) => child_value(node, path),
    }
}

fn child_value(node: &Value, path: &str) -> Value {
    let segments: Vec<String> = path.split('/').map(str::to_string).collect();
    get_at(node, &segments)
        .map(|value| data_of(value).clone())
        .unwrap_or(Value::Null)
}

fn compare_to_bound(order: &OrderBy, key: &str, node: &Value, bound: &Bound) -> Ordering {
    let ordering = match order {
        OrderBy::Key => compare_keys(key, bound.value.as_str().unwrap_or_default()),
        OrderBy::Priority => compare_priorities(&sort_value(order, key, node), &bound.value),
        _ => compare_values(&sort_value(order, key, node), &bound.value),
    };
    match (ordering, &bound.key) {
        (Ordering::Equal, Some(bound_key)) => compare_keys(key, bound_key),
        (ordering, _) => ordering,
    }
}

fn passes_start(order: &OrderBy, key: &str, node: &Value, bound: &Bound) -> bool {
    match compare_to_bound(order, key, node, bound) {
        Ordering::Greater => true,
        Ordering::Equal => bound.inclusive,
        Ordering::Less => false,
    }
}

fn passes_end(order: &OrderBy, key: &str, node: &Value, bound: &Bound) -> bool {
    match compare_to_bound(order, key, node, bound) {
        Ordering::Less => true,
        Ordering::Equal => bound.inclusive,
        Ordering::Greater => false,
    }
}

fn as_index_key(key: &str) -> Option<i64> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    let canonical = !digits.is_empty()
        && digits.bytes().all(|byte| byte.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'))
        && key != "-0";
    if canonical {
        key.parse().ok()
    } else {
        None
    }
}

/// Integer-like keys sort numerically before every other key, which sort as
/// strings.
pub(crate) fn compare_keys(left: &str, right: &str) -> Ordering {
    match (as_index_key(left), as_index_key(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

fn value_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

/// null < false < true < numbers < strings < objects.
fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
        (Value::Number(left), Value::Number(right)) => compare_numbers(left.as_f64(), right.as_f64()),
        (Value::String(left), Value::String(right)) => left.cmp(right),
        _ => value_rank(left).cmp(&value_rank(right)),
    }
}

/// No priority < numeric priorities < string priorities.
fn compare_priorities(left: &Value, right: &Value) -> Ordering {
    let rank = |value: &Value| match value {
        Value::Number(_) => 1,
        Value::String(_) => 2,
        _ => 0,
    };
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => compare_numbers(left.as_f64(), right.as_f64()),
        (Value::String(left), Value::String(right)) => left.cmp(right),
        _ => rank(left).cmp(&rank(right)),
    }
}

fn compare_numbers(left: Option<f64>, right: Option<f64>) -> Ordering {
    left.unwrap_or_default()
        .partial_cmp(&right.unwrap_or_default())
        .unwrap_or(Ordering::Equal)
}
