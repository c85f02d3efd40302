//! Process-wide shared variable store.
//!
//! Macros in any injection read and write the same store (`set`, `add`,
//! `$name` references). Mutations are serialized behind one lock; readers
//! observe the last completed write. The store lives for the daemon's
//! lifetime and starts empty.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// A variable value: an integer or a short string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Int(i64),
    Text(String),
}

impl VarValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            VarValue::Int(i) => Some(*i),
            VarValue::Text(s) => s.parse().ok(),
        }
    }
}

impl std::fmt::Display for VarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarValue::Int(i) => write!(f, "{i}"),
            VarValue::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct VarStore {
    inner: Mutex<HashMap<String, VarValue>>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<VarValue> {
        self.lock().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: VarValue) {
        self.lock().insert(name.to_string(), value);
    }

    /// Atomic increment. Missing or non-numeric values count as 0.
    pub fn add(&self, name: &str, delta: i64) -> i64 {
        let mut map = self.lock();
        let current = map.get(name).and_then(VarValue::as_int).unwrap_or(0);
        let next = current.wrapping_add(delta);
        map.insert(name.to_string(), VarValue::Int(next));
        next
    }

    /// Copy of the whole store, for status output and debugging.
    pub fn snapshot(&self) -> HashMap<String, VarValue> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VarValue>> {
        // A poisoned store only means a writer panicked mid-insert; the map
        // itself is still a consistent HashMap.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let store = VarStore::new();
        assert_eq!(store.get("foo"), None);
        store.set("foo", VarValue::Int(1));
        assert_eq!(store.get("foo"), Some(VarValue::Int(1)));
        store.set("foo", VarValue::Text("bar".into()));
        assert_eq!(store.get("foo"), Some(VarValue::Text("bar".into())));
    }

    #[test]
    fn add_treats_missing_as_zero() {
        let store = VarStore::new();
        assert_eq!(store.add("n", 5), 5);
        assert_eq!(store.add("n", -2), 3);
        store.set("s", VarValue::Text("10".into()));
        assert_eq!(store.add("s", 1), 11);
        store.set("junk", VarValue::Text("abc".into()));
        assert_eq!(store.add("junk", 1), 1);
    }
}
