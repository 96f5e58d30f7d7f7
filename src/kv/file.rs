use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error};

use super::{KvError, KvStore};

/// A store persisted as one JSON object in a file.
///
/// The file and its parent directories are created on the first write. Every
/// operation rereads the file, so several stores may share a path.
#[derive(Debug)]
pub struct JsonFileKv {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl JsonFileKv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, KvError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let s = fs::read_to_string(&self.path)?;
        if s.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&s)? {
            Value::Object(obj) => Ok(obj),
            other => Err(KvError::NotAnObject(other.to_string())),
        }
    }

    fn store(&self, entries: &Map<String, Value>) -> Result<(), KvError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, data).map_err(|e| {
            error!(?e, "Failed to write store file: {:?}", self.path);
            KvError::Io(e)
        })?;
        debug!(path = %self.path.display(), keys = entries.len(), "saved store");
        Ok(())
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut Map<String, Value>) -> T,
    ) -> Result<T, KvError> {
        let _guard = self.lock.lock().map_err(|_| KvError::Poisoned)?;
        let mut entries = self.load()?;
        let out = f(&mut entries);
        self.store(&entries)?;
        Ok(out)
    }
}

impl KvStore for JsonFileKv {
    fn read(&self, key: &str) -> Result<Option<Value>, KvError> {
        let _guard = self.lock.lock().map_err(|_| KvError::Poisoned)?;
        Ok(self.load()?.remove(key))
    }

    fn write(&self, key: &str, value: Value) -> Result<(), KvError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn delete(&self, key: &str) -> Result<Option<Value>, KvError> {
        self.update(|entries| entries.remove(key))
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>, KvError> {
        let _guard = self.lock.lock().map_err(|_| KvError::Poisoned)?;
        Ok(self.load()?.into_iter().collect())
    }
}
