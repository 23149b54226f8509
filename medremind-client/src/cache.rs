//! Local key-value cache. Values are opaque JSON; callers pick the shape.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::AppError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError>;
    fn set(&self, key: &str, value: Value) -> Result<(), AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
}

/// Reads `key` and decodes it; a value of the wrong shape counts as absent.
pub fn get_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(key, error = %e, "cache: ignoring malformed entry");
            Ok(None)
        }
    }
}

pub fn set_typed<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), AppError> {
    let value = serde_json::to_value(value)
        .map_err(|e| AppError::Config(format!("cache encode {key} failed: {e}")))?;
    store.set(key, value)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
        Ok(())
    }
}

/// One JSON object on disk, rewritten whole on every change through a temp
/// file in the same directory so a crash never leaves a torn cache.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Map<String, Value>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Map<String, Value>>(&data) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cache: unreadable file; starting empty");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(AppError::Io(e)),
        };
        Ok(Self {
            path,
            inner: Mutex::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, map: &Map<String, Value>) -> Result<(), AppError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let data = serde_json::to_vec_pretty(map)
            .map_err(|e| AppError::Config(format!("cache encode failed: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AppError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), value);
        self.flush(&map)
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if map.remove(key).is_some() {
            self.flush(&map)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.set("notifications", json!([{"id": 1}])).unwrap();
            store.set("scratch", json!(true)).unwrap();
            store.remove("scratch").unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("notifications").unwrap(), Some(json!([{"id": 1}])));
        assert_eq!(store.get("scratch").unwrap(), None);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn typed_read_ignores_wrong_shape() {
        let store = MemoryStore::new();
        store.set("n", json!("not a number")).unwrap();
        let v: Option<i32> = get_typed(&store, "n").unwrap();
        assert_eq!(v, None);
        set_typed(&store, "n", &5).unwrap();
        assert_eq!(get_typed::<i32>(&store, "n").unwrap(), Some(5));
    }
}
