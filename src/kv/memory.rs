use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{KvError, KvStore};

#[derive(Debug, Default)]
pub struct InMemoryKv {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: BTreeMap<String, Value>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Seed the store from any value that serializes to a JSON object.
    pub fn from_serialize(state: &impl Serialize) -> Result<Self, KvError> {
        match serde_json::to_value(state)? {
            Value::Object(obj) => Ok(Self::from_map(obj.into_iter().collect())),
            other => Err(KvError::NotAnObject(other.to_string())),
        }
    }
}

impl KvStore for InMemoryKv {
    fn read(&self, key: &str) -> Result<Option<Value>, KvError> {
        let entries = self.entries.read().map_err(|_| KvError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: Value) -> Result<(), KvError> {
        let mut entries = self.entries.write().map_err(|_| KvError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<Value>, KvError> {
        let mut entries = self.entries.write().map_err(|_| KvError::Poisoned)?;
        Ok(entries.remove(key))
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>, KvError> {
        let entries = self.entries.read().map_err(|_| KvError::Poisoned)?;
        Ok(entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct State {
        todos: Vec<String>,
        done: u32,
    }

    #[test]
    fn write_read_delete() {
        let kv = InMemoryKv::new();
        kv.write("b", json!(2)).unwrap();
        kv.write("a", json!({"x": 1})).unwrap();
        assert_eq!(kv.read("a").unwrap(), Some(json!({"x": 1})));
        assert_eq!(kv.list_keys().unwrap(), vec!["a", "b"]);
        assert_eq!(kv.delete("b").unwrap(), Some(json!(2)));
        assert_eq!(kv.delete("b").unwrap(), None);
        assert_eq!(kv.read("b").unwrap(), None);
    }

    #[test]
    fn seeded_from_a_struct() {
        let kv = InMemoryKv::from_serialize(&State {
            todos: vec!["milk".into()],
            done: 0,
        })
        .unwrap();
        assert_eq!(kv.read("todos").unwrap(), Some(json!(["milk"])));
        assert!(matches!(
            InMemoryKv::from_serialize(&vec![1, 2]),
            Err(KvError::NotAnObject(_))
        ));
    }
}
