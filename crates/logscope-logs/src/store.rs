//! Persistence of tail state across restarts
//!
//! State is a list of `{filePath, position, lastLineNumber}` records kept under
//! a single namespaced key of a JSON object. Records that fail to decode are
//! skipped; missing numeric fields default to 0.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use logscope_types::PersistedTail;

use crate::error::StoreError;

/// Key the tail records are stored under
pub const TAILED_FILES_KEY: &str = "tailedFiles";

/// Key-value store for tail state
pub trait TailStateStore: Send + Sync {
    fn load(&self) -> Result<Vec<PersistedTail>, StoreError>;
    fn save(&self, records: &[PersistedTail]) -> Result<(), StoreError>;
}

/// Store backed by a JSON file shared with other namespaced keys
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_object(&self) -> Result<Map<String, Value>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "State file is not a JSON object, ignoring");
                Ok(Map::new())
            }
            Err(source) => Err(StoreError::Json {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl TailStateStore for JsonFileStore {
    fn load(&self) -> Result<Vec<PersistedTail>, StoreError> {
        let object = self.read_object()?;
        Ok(decode_records(object.get(TAILED_FILES_KEY)))
    }

    fn save(&self, records: &[PersistedTail]) -> Result<(), StoreError> {
        let mut object = self.read_object().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Replacing unreadable state file");
            Map::new()
        });
        let value = serde_json::to_value(records).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        object.insert(TAILED_FILES_KEY.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content =
            serde_json::to_string_pretty(&Value::Object(object)).map_err(|source| {
                StoreError::Json {
                    path: self.path.clone(),
                    source,
                }
            })?;
        fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory store, used when persistence is not backed by a file
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedTail>>,
}

impl MemoryStore {
    pub fn with_records(records: Vec<PersistedTail>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl TailStateStore for MemoryStore {
    fn load(&self) -> Result<Vec<PersistedTail>, StoreError> {
        Ok(self.records.lock().clone())
    }

    fn save(&self, records: &[PersistedTail]) -> Result<(), StoreError> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}

fn decode_records(value: Option<&Value>) -> Vec<PersistedTail> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        tracing::warn!("Persisted tail state is not a list, ignoring");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<PersistedTail>(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed tail record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str, position: u64, line: u64) -> PersistedTail {
        PersistedTail {
            file_path: PathBuf::from(path),
            position,
            last_line_number: line,
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        let records = vec![record("/a.log", 10, 2), record("/b.log", 0, 0)];

        store.save(&records).unwrap();
        assert_eq!(store.load().unwrap(), records);

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"filePath\""));
        assert!(raw.contains("\"lastLineNumber\""));
    }

    #[test]
    fn test_save_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"searchTerm":"admin"}"#).unwrap();

        let store = JsonFileStore::new(&path);
        store.save(&[record("/a.log", 1, 1)]).unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["searchTerm"], "admin");
        assert_eq!(value[TAILED_FILES_KEY].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_records_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"tailedFiles":[{"filePath":"/a.log"},{"position":5},{"filePath":"/b.log","position":"x"},{"filePath":"/c.log","position":7,"lastLineNumber":3}]}"#,
        )
        .unwrap();

        let records = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(records, vec![record("/a.log", 0, 0), record("/c.log", 7, 3)]);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).load(),
            Err(StoreError::Json { .. })
        ));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::default();
        store.save(&[record("/a.log", 3, 1)]).unwrap();
        assert_eq!(store.load().unwrap(), vec![record("/a.log", 3, 1)]);
    }
}
