// SPDX-License-Identifier: MIT

//! Mutable run state
//!
//! A [`StateContainer`] is owned by exactly one run; it is never shared
//! between concurrent runs. Every mutation goes through [`StateContainer::apply`]
//! (or [`StateContainer::replace`] for snapshot restores) and bumps the
//! monotone revision counter, so history entries always refer to a stable
//! point in the state's life.

use serde_json::{Map, Value};

/// The mutable payload passed between nodes.
#[derive(Debug, Clone, Default)]
pub struct StateContainer {
    values: Map<String, Value>,
    revision: u64,
    metadata: Map<String, Value>,
}

impl StateContainer {
    /// Create an empty container at revision 0
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a container seeded with initial values, at revision 0
    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            values,
            revision: 0,
            metadata: Map::new(),
        }
    }

    /// Merge a delta into the values, key by key, and bump the revision.
    /// Returns the new revision.
    pub fn apply(&mut self, delta: &Map<String, Value>) -> u64 {
        for (k, v) in delta {
            self.values.insert(k.clone(), v.clone());
        }
        self.revision += 1;
        self.revision
    }

    /// Replace the values wholesale (snapshot restore). Bumps the revision.
    pub fn replace(&mut self, values: Map<String, Value>) -> u64 {
        self.values = values;
        self.revision += 1;
        self.revision
    }

    /// Get a top-level value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a nested value using dot notation (e.g. `"result.intent"`)
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Keys whose values differ between `self` and `other`, mapped to
    /// `self`'s value (`Null` for keys absent here but present there).
    pub fn diff(&self, other: &Self) -> Map<String, Value> {
        let mut changed = Map::new();
        for (k, v) in &self.values {
            if other.values.get(k) != Some(v) {
                changed.insert(k.clone(), v.clone());
            }
        }
        for k in other.values.keys() {
            if !self.values.contains_key(k) {
                changed.insert(k.clone(), Value::Null);
            }
        }
        changed
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_apply_bumps_revision() {
        let mut state = StateContainer::empty();
        assert_eq!(state.revision(), 0);

        let rev = state.apply(&delta(&[("a", json!(1))]));
        assert_eq!(rev, 1);
        assert_eq!(state.get("a"), Some(&json!(1)));

        let rev = state.apply(&delta(&[("a", json!(2)), ("b", json!("x"))]));
        assert_eq!(rev, 2);
        assert_eq!(state.get("a"), Some(&json!(2)));
        assert_eq!(state.get("b"), Some(&json!("x")));
    }

    #[test]
    fn test_replace_is_wholesale() {
        let mut state = StateContainer::empty();
        state.apply(&delta(&[("a", json!(1)), ("b", json!(2))]));

        state.replace(delta(&[("c", json!(3))]));
        assert!(state.get("a").is_none());
        assert!(state.get("b").is_none());
        assert_eq!(state.get("c"), Some(&json!(3)));
        assert_eq!(state.revision(), 2);
    }

    #[test]
    fn test_get_path() {
        let mut state = StateContainer::empty();
        state.apply(&delta(&[("result", json!({"data": {"value": 42}}))]));

        assert_eq!(state.get_path("result.data.value"), Some(&json!(42)));
        assert_eq!(state.get_path("result.data"), Some(&json!({"value": 42})));
        assert_eq!(state.get_path("result.missing"), None);
        assert_eq!(state.get_path("missing"), None);
    }

    #[test]
    fn test_diff() {
        let mut a = StateContainer::empty();
        a.apply(&delta(&[("same", json!(1)), ("changed", json!("new")), ("added", json!(true))]));

        let mut b = StateContainer::empty();
        b.apply(&delta(&[("same", json!(1)), ("changed", json!("old")), ("removed", json!(2))]));

        let d = a.diff(&b);
        assert!(!d.contains_key("same"));
        assert_eq!(d.get("changed"), Some(&json!("new")));
        assert_eq!(d.get("added"), Some(&json!(true)));
        assert_eq!(d.get("removed"), Some(&Value::Null));
    }

    #[test]
    fn test_clone_is_a_deep_copy() {
        let mut state = StateContainer::empty();
        state.apply(&delta(&[("a", json!([1, 2]))]));

        let mut copy = state.clone();
        copy.apply(&delta(&[("a", json!([3]))]));

        assert_eq!(state.get("a"), Some(&json!([1, 2])));
        assert_eq!(copy.get("a"), Some(&json!([3])));
    }
}
