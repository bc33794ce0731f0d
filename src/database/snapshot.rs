use serde_json::Value;

use crate::database::error::DatabaseResult;
use crate::database::modifiers::QueryModifiers;
use crate::database::native::{query_view, NativeSnapshot};
use crate::database::path::normalize_path;
use crate::database::reference::DatabaseReference;
use crate::database::tree::{data_of, get_at, priority_of, strip_priorities};

/// Immutable copy of the data at a location.
#[derive(Clone, Debug)]
pub struct DataSnapshot {
    reference: DatabaseReference,
    value: Value,
    child_keys: Vec<String>,
}

impl DataSnapshot {
    pub(crate) fn from_native(reference: DatabaseReference, snapshot: NativeSnapshot) -> Self {
        Self {
            reference,
            value: snapshot.value,
            child_keys: snapshot.child_keys,
        }
    }

    /// Snapshot of a raw node; children are ordered by priority, then key.
    pub(crate) fn from_value(reference: DatabaseReference, value: Value) -> Self {
        let child_keys = query_view(&value, &QueryModifiers::default())
            .children
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        Self {
            reference,
            value,
            child_keys,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.reference.key()
    }

    pub fn reference(&self) -> &DatabaseReference {
        &self.reference
    }

    pub fn exists(&self) -> bool {
        !data_of(&self.value).is_null()
    }

    /// The data without priorities.
    pub fn val(&self) -> Value {
        strip_priorities(&self.value)
    }

    pub fn into_value(self) -> Value {
        strip_priorities(&self.value)
    }

    /// The data with priorities, as `{".value": v, ".priority": p}` wrappers.
    pub fn export_val(&self) -> Value {
        self.value.clone()
    }

    /// `null` when the node has no priority.
    pub fn priority(&self) -> Value {
        priority_of(&self.value)
    }

    pub fn child(&self, path: &str) -> DatabaseResult<DataSnapshot> {
        let segments = normalize_path(path)?;
        let value = get_at(&self.value, &segments).cloned().unwrap_or(Value::Null);
        let mut location = self.reference.segments().to_vec();
        location.extend(segments);
        Ok(Self::from_value(self.reference.with_segments(location), value))
    }

    pub fn has_child(&self, path: &str) -> DatabaseResult<bool> {
        let segments = normalize_path(path)?;
        Ok(get_at(&self.value, &segments).is_some_and(|value| !data_of(value).is_null()))
    }

    pub fn has_children(&self) -> bool {
        !self.child_keys.is_empty()
    }

    pub fn num_children(&self) -> usize {
        self.child_keys.len()
    }

    /// Child keys in the order of the query that produced the snapshot.
    pub fn child_keys(&self) -> &[String] {
        &self.child_keys
    }

    /// Visits the children in order. Returns `true` when `action` stopped the
    /// iteration by returning `true`.
    pub fn for_each<F>(&self, mut action: F) -> bool
    where
        F: FnMut(DataSnapshot) -> bool,
    {
        for key in &self.child_keys {
            let value = get_at(&self.value, std::slice::from_ref(key))
                .cloned()
                .unwrap_or(Value::Null);
            let mut location = self.reference.segments().to_vec();
            location.push(key.clone());
            if action(Self::from_value(self.reference.with_segments(location), value)) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::reference;
    use crate::test_support::database_with;
    use serde_json::json;

    fn snapshot_of(name: &str, value: Value) -> DataSnapshot {
        let (database, _) = database_with(name);
        let root = reference(&database, "items").unwrap();
        DataSnapshot::from_value(root, value)
    }

    #[test]
    fn children_follow_priority_then_key_order() {
        let snapshot = snapshot_of(
            "snapshot-order",
            json!({
                "b": 1,
                "a": {".value": 2, ".priority": 5},
                "10": 3,
                "9": 4,
            }),
        );
        assert_eq!(snapshot.child_keys(), ["9", "10", "b", "a"]);
        assert_eq!(snapshot.num_children(), 4);
        assert_eq!(snapshot.val()["a"], json!(2));
        assert_eq!(snapshot.export_val()["a"][".priority"], json!(5));
    }

    #[test]
    fn child_navigation() {
        let snapshot = snapshot_of("snapshot-child", json!({"user": {"name": "Ada"}}));
        let name = snapshot.child("user/name").unwrap();
        assert_eq!(name.key(), Some("name"));
        assert_eq!(name.reference().path(), "items/user/name");
        assert_eq!(name.val(), json!("Ada"));
        assert!(snapshot.has_child("user").unwrap());
        assert!(!snapshot.has_child("missing").unwrap());
        assert!(!snapshot.child("missing").unwrap().exists());
        assert!(snapshot.child("bad$").is_err());
    }

    #[test]
    fn for_each_can_stop_early() {
        let snapshot = snapshot_of("snapshot-each", json!({"a": 1, "b": 2, "c": 3}));
        let mut visited = Vec::new();
        let stopped = snapshot.for_each(|child| {
            visited.push(child.val());
            child.key() == Some("b")
        });
        assert!(stopped);
        assert_eq!(visited, [json!(1), json!(2)]);
    }

    #[test]
    fn leaf_priority_is_reported() {
        let snapshot = snapshot_of("snapshot-leaf", json!({".value": "x", ".priority": "p"}));
        assert!(snapshot.exists());
        assert!(!snapshot.has_children());
        assert_eq!(snapshot.val(), json!("x"));
        assert_eq!(snapshot.priority(), json!("p"));
    }
}
