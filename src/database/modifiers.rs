use serde_json::{Map, Value};

use crate::database::error::{invalid_argument, DatabaseResult};
use crate::database::path::{normalize_path, validate_key};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderBy {
    Key,
    Value,
    Priority,
    /// Normalised child path, segments joined with `/`.
    Child(String),
}

impl OrderBy {
    pub fn as_index(&self) -> &str {
        match self {
            OrderBy::Key => "$key",
            OrderBy::Value => "$value",
            OrderBy::Priority => "$priority",
            OrderBy::Child(path) => path,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    pub value: Value,
    /// Tie breaker compared against child keys when values are equal.
    pub key: Option<String>,
    pub inclusive: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    First(u32),
    Last(u32),
}

/// Ordering, range and limit applied to a location. Built incrementally by the
/// query constraints; every step is validated so a finished value is always
/// well formed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryModifiers {
    pub(crate) order: Option<OrderBy>,
    pub(crate) start: Option<Bound>,
    pub(crate) end: Option<Bound>,
    pub(crate) limit: Option<Limit>,
}

impl QueryModifiers {
    pub fn order(&self) -> Option<&OrderBy> {
        self.order.as_ref()
    }

    pub fn start(&self) -> Option<&Bound> {
        self.start.as_ref()
    }

    pub fn end(&self) -> Option<&Bound> {
        self.end.as_ref()
    }

    pub fn limit(&self) -> Option<Limit> {
        self.limit
    }

    pub fn is_default(&self) -> bool {
        self.order.is_none() && self.start.is_none() && self.end.is_none() && self.limit.is_none()
    }

    /// Ordering used when evaluating; priority order is the implicit default.
    pub fn effective_order(&self) -> OrderBy {
        self.order.clone().unwrap_or(OrderBy::Priority)
    }

    pub(crate) fn set_order(&mut self, order: OrderBy) -> DatabaseResult<()> {
        if self.order.is_some() {
            return Err(invalid_argument(
                "You can't combine multiple order_by calls",
            ));
        }
        self.order = Some(order);
        self.validate_endpoints()
    }

    pub(crate) fn set_start(&mut self, bound: Bound) -> DatabaseResult<()> {
        if self.start.is_some() {
            return Err(invalid_argument(
                "start_at, start_after or equal_to has already been specified",
            ));
        }
        self.start = Some(bound);
        self.validate_endpoints()
    }

    pub(crate) fn set_end(&mut self, bound: Bound) -> DatabaseResult<()> {
        if self.end.is_some() {
            return Err(invalid_argument(
                "end_at, end_before or equal_to has already been specified",
            ));
        }
        self.end = Some(bound);
        self.validate_endpoints()
    }

    pub(crate) fn set_equal(&mut self, value: Value, key: Option<String>) -> DatabaseResult<()> {
        if self.start.is_some() || self.end.is_some() {
            return Err(invalid_argument(
                "equal_to can't be combined with a start or end bound",
            ));
        }
        let bound = Bound {
            value,
            key,
            inclusive: true,
        };
        self.start = Some(bound.clone());
        self.end = Some(bound);
        self.validate_endpoints()
    }

    pub(crate) fn set_limit(&mut self, limit: Limit) -> DatabaseResult<()> {
        if self.limit.is_some() {
            return Err(invalid_argument(
                "limit_to_first or limit_to_last has already been specified",
            ));
        }
        let count = match limit {
            Limit::First(count) | Limit::Last(count) => count,
        };
        if count == 0 {
            return Err(invalid_argument("Query limit must be a positive integer"));
        }
        self.limit = Some(limit);
        Ok(())
    }

    fn validate_endpoints(&self) -> DatabaseResult<()> {
        for bound in [&self.start, &self.end].into_iter().flatten() {
            validate_bound(bound)?;
            match self.order {
                Some(OrderBy::Key) => {
                    if bound.key.is_some() {
                        return Err(invalid_argument(
                            "When ordering by key you may only pass one argument to start_at, end_at or equal_to",
                        ));
                    }
                    if !bound.value.is_string() {
                        return Err(invalid_argument(
                            "When ordering by key, the bound passed to start_at, end_at or equal_to must be a string",
                        ));
                    }
                }
                Some(OrderBy::Priority) => {
                    if !matches!(bound.value, Value::Null | Value::Number(_) | Value::String(_)) {
                        return Err(invalid_argument(
                            "When ordering by priority, the bound must be a valid priority (null, a number or a string)",
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Wire form handed to the native module.
    pub fn to_native(&self) -> Value {
        let mut params = Map::new();
        if let Some(order) = &self.order {
            params.insert("orderBy".into(), Value::String(order.as_index().to_string()));
        }
        if let Some(bound) = &self.start {
            let name = if bound.inclusive { "startAt" } else { "startAfter" };
            params.insert(name.into(), bound.value.clone());
            if let Some(key) = &bound.key {
                params.insert("startKey".into(), Value::String(key.clone()));
            }
        }
        if let Some(bound) = &self.end {
            let name = if bound.inclusive { "endAt" } else { "endBefore" };
            params.insert(name.into(), bound.value.clone());
            if let Some(key) = &bound.key {
                params.insert("endKey".into(), Value::String(key.clone()));
            }
        }
        match self.limit {
            Some(Limit::First(count)) => {
                params.insert("limitToFirst".into(), Value::from(count));
            }
            Some(Limit::Last(count)) => {
                params.insert("limitToLast".into(), Value::from(count));
            }
            None => {}
        }
        Value::Object(params)
    }

    /// Stable identifier of the modifiers; two queries at the same path with
    /// equal keys observe the same data.
    pub fn canonical_key(&self) -> String {
        if self.is_default() {
            "default".to_string()
        } else {
            self.to_native().to_string()
        }
    }
}

pub(crate) fn validate_order_by_child(path: &str) -> DatabaseResult<String> {
    match path {
        "$key" => Err(invalid_argument(
            "order_by_child: \"$key\" is invalid, use order_by_key() instead",
        )),
        "$priority" => Err(invalid_argument(
            "order_by_child: \"$priority\" is invalid, use order_by_priority() instead",
        )),
        "$value" => Err(invalid_argument(
            "order_by_child: \"$value\" is invalid, use order_by_value() instead",
        )),
        _ => {
            let segments = normalize_path(path)?;
            if segments.is_empty() {
                return Err(invalid_argument("order_by_child requires a non-empty path"));
            }
            Ok(segments.join("/"))
        }
    }
}

fn validate_bound(bound: &Bound) -> DatabaseResult<()> {
    if matches!(bound.value, Value::Object(_) | Value::Array(_)) {
        return Err(invalid_argument(
            "Query bounds must be null, a boolean, a number or a string",
        ));
    }
    if let Some(key) = &bound.key {
        validate_key(key)?;
    }
    Ok(())
}
