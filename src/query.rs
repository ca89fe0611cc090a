//! # Query Predicates
//!
//! `Registry::query` matches objects against a set of key/value equality
//! constraints over the object's flattened dictionary (structural fields
//! plus `attrs`) — the same shape `queryable.query_dict` checks in the
//! original, and that `KVObject.query(**kwargs)` calls on a single object.

use serde_json::Value;
use std::collections::HashMap;

/// A query against the registry: either "every object" or a conjunction of
/// key/value equality constraints.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub all: bool,
    pub constraints: HashMap<String, Value>,
}

impl Query {
    pub fn all() -> Self {
        Self { all: true, constraints: HashMap::new() }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut constraints = HashMap::new();
        constraints.insert(key.into(), value.into());
        Self { all: false, constraints }
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    /// Test whether `dict` (a flattened object dictionary) satisfies this
    /// query. A constraint key absent from `dict` fails the match, even if
    /// the desired value is JSON `null`.
    pub fn matches(&self, dict: &HashMap<String, Value>) -> bool {
        if self.all {
            return true;
        }
        self.constraints.iter().all(|(k, v)| dict.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> HashMap<String, Value> {
        let mut d = HashMap::new();
        d.insert("collection".to_string(), Value::String("origin".into()));
        d.insert("a".to_string(), Value::from(1));
        d
    }

    #[test]
    fn all_matches_everything() {
        assert!(Query::all().matches(&dict()));
        assert!(Query::all().matches(&HashMap::new()));
    }

    #[test]
    fn single_constraint_matches_exact_value() {
        let q = Query::eq("collection", "origin");
        assert!(q.matches(&dict()));
        let q2 = Query::eq("collection", "processes");
        assert!(!q2.matches(&dict()));
    }

    #[test]
    fn missing_key_fails_match() {
        let q = Query::eq("nonexistent", "x");
        assert!(!q.matches(&dict()));
    }

    #[test]
    fn conjunction_requires_all_constraints() {
        let q = Query::eq("collection", "origin").and("a", 1);
        assert!(q.matches(&dict()));
        let q2 = Query::eq("collection", "origin").and("a", 2);
        assert!(!q2.matches(&dict()));
    }
}
