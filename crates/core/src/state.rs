use parking_lot::RwLock;
use serde_json::Value;

use crate::collab::StateContainer;
use crate::path;

/// In-process application state backed by a JSON object.
#[derive(Debug)]
pub struct MemoryAppState {
    inner: RwLock<Value>,
}

impl MemoryAppState {
    pub fn new(initial: Value) -> Self {
        let initial = if initial.is_object() {
            initial
        } else {
            Value::Object(serde_json::Map::new())
        };
        Self {
            inner: RwLock::new(initial),
        }
    }
}

impl Default for MemoryAppState {
    fn default() -> Self {
        Self::new(Value::Object(serde_json::Map::new()))
    }
}

impl StateContainer for MemoryAppState {
    fn snapshot(&self) -> Value {
        self.inner.read().clone()
    }

    fn get(&self, path: &str) -> Option<Value> {
        path::get(&self.inner.read(), path).cloned()
    }

    fn set_state(&self, path: &str, value: Value) {
        path::set(&mut self.inner.write(), path, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patches_are_visible_in_later_snapshots() {
        let state = MemoryAppState::default();
        state.set_state("form.title", json!("draft"));
        state.set_state("count", json!(1));
        assert_eq!(state.snapshot(), json!({"form": {"title": "draft"}, "count": 1}));
        assert_eq!(state.get("form.title"), Some(json!("draft")));
        assert_eq!(state.get("nope"), None);
    }

    #[test]
    fn non_object_initial_state_is_replaced() {
        let state = MemoryAppState::new(json!(3));
        assert_eq!(state.snapshot(), json!({}));
    }
}
