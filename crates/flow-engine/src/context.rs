//! Contexts - the named-field maps flowing between nodes
//!
//! A [`Context`] carries one unit of work (or one packed batch) as a
//! string-keyed `serde_json::Value` map. Producers emit contexts, processors
//! transform them, consumers read them. Batched contexts hold one array per
//! key plus a unit count under [`BATCH_LEN_KEY`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved key holding the number of units packed into a batched context
pub const BATCH_LEN_KEY: &str = "batch_len";

/// One unit (or one batch) of data moving through the graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from an existing map
    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Builder-style insert, handy when constructing literal contexts
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Get a field by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Insert or replace a field
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Remove a field, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Whether a field is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the context has no fields
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Field keys in sorted order. Map iteration order is unspecified, so
    /// sinks that need a stable column order go through this.
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Consume the context into its underlying map
    pub fn into_map(self) -> HashMap<String, Value> {
        self.values
    }

    /// Merge another context into this one. On key collision the incoming
    /// value wins (last-write-wins, no deep merge).
    pub fn merge(&mut self, other: Context) {
        for (key, value) in other.values {
            self.values.insert(key, value);
        }
    }

    /// Append one unit to this batched context. Every field of the unit is
    /// pushed onto an array under the same key, and the unit count under
    /// [`BATCH_LEN_KEY`] is bumped. Units with differing key sets produce
    /// arrays of differing lengths; keep unit shapes uniform within a batch.
    pub fn push_unit(&mut self, unit: Context) {
        for (key, value) in unit.values {
            match self.values.get_mut(&key) {
                Some(Value::Array(items)) => items.push(value),
                _ => {
                    self.values.insert(key, Value::Array(vec![value]));
                }
            }
        }
        let count = self.unit_count() + 1;
        self.values
            .insert(BATCH_LEN_KEY.to_string(), Value::from(count as u64));
    }

    /// Number of units packed into this batched context (0 for unit contexts)
    pub fn unit_count(&self) -> usize {
        self.values
            .get(BATCH_LEN_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }

    /// Read one unit's value out of a batched field
    pub fn unit_value(&self, key: &str, index: usize) -> Option<&Value> {
        match self.values.get(key) {
            Some(Value::Array(items)) => items.get(index),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_is_last_write_wins() {
        let mut merged = Context::new();
        merged.merge(Context::new().with("x", json!(1)));
        merged.merge(Context::new().with("x", json!(2)).with("y", json!(3)));

        assert_eq!(merged.get("x"), Some(&json!(2)));
        assert_eq!(merged.get("y"), Some(&json!(3)));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_push_unit_packs_arrays() {
        let mut batch = Context::new();
        batch.push_unit(Context::new().with("frame", json!("a.jpg")));
        batch.push_unit(Context::new().with("frame", json!("b.jpg")));

        assert_eq!(batch.unit_count(), 2);
        assert_eq!(batch.get("frame"), Some(&json!(["a.jpg", "b.jpg"])));
        assert_eq!(batch.unit_value("frame", 1), Some(&json!("b.jpg")));
        assert_eq!(batch.unit_value("frame", 2), None);
    }

    #[test]
    fn test_unit_count_zero_for_unit_context() {
        let ctx = Context::new().with("frame", json!("a.jpg"));
        assert_eq!(ctx.unit_count(), 0);
    }

    #[test]
    fn test_sorted_keys_are_stable() {
        let ctx = Context::new()
            .with("zeta", json!(1))
            .with("alpha", json!(2))
            .with("mid", json!(3));
        assert_eq!(ctx.sorted_keys(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_serde_transparency() {
        let ctx = Context::new().with("filename", json!("f.png"));
        let text = serde_json::to_string(&ctx).unwrap();
        let back: Context = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ctx);
    }
}
