//! Key/value state for applications built on the engine.
//!
//! Values are arbitrary JSON. Keys are listed in sorted order.

mod error;
mod file;
mod memory;

pub use error::KvError;
pub use file::JsonFileKv;
pub use memory::InMemoryKv;

use serde_json::Value;
use std::collections::BTreeMap;

pub trait KvStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Value>, KvError>;

    /// Insert or replace `key`.
    fn write(&self, key: &str, value: Value) -> Result<(), KvError>;

    /// Remove `key`, returning the previous value if there was one.
    fn delete(&self, key: &str) -> Result<Option<Value>, KvError>;

    fn read_all(&self) -> Result<BTreeMap<String, Value>, KvError>;

    fn list_keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self.read_all()?.into_keys().collect())
    }
}
