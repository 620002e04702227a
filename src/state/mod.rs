// State module - Persistent storage for per-process control state

use crate::control::ControlState;
use crate::error::{OverseerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Version of the state file format
const STATE_VERSION: &str = "1.0.0";

/// Control state of every process, keyed by process name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: String,
    #[serde(default)]
    pub processes: BTreeMap<String, ControlState>,
}

impl PersistedState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            processes: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != STATE_VERSION {
            return Err(OverseerError::Persistence(format!(
                "Incompatible state version: expected {}, found {}",
                STATE_VERSION, self.version
            )));
        }
        Ok(())
    }
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new()
    }
}

/// State store handles persistence of control state to disk
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load state from disk; a missing file yields an empty state
    pub fn load(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            return Ok(PersistedState::new());
        }

        let file = File::open(&self.path).map_err(|e| {
            OverseerError::Persistence(format!("Failed to open state file: {}", e))
        })?;

        let state: PersistedState = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            OverseerError::Persistence(format!("Failed to parse state file: {}", e))
        })?;

        state.validate()?;

        Ok(state)
    }

    /// Save state to disk with atomic writes
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                OverseerError::Persistence(format!("Failed to create state directory: {}", e))
            })?;
        }

        let temp_path = self.path.with_extension("tmp");

        {
            let file = File::create(&temp_path).map_err(|e| {
                OverseerError::Persistence(format!("Failed to create temp state file: {}", e))
            })?;

            let mut writer = BufWriter::new(file);

            serde_json::to_writer_pretty(&mut writer, state).map_err(|e| {
                OverseerError::Persistence(format!("Failed to serialize state: {}", e))
            })?;

            writer.flush().map_err(|e| {
                OverseerError::Persistence(format!("Failed to flush state file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            OverseerError::Persistence(format!("Failed to rename temp state file: {}", e))
        })?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::MonitorState;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));

        let state = store.load().unwrap();
        assert!(state.processes.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));

        let mut state = PersistedState::new();
        state.processes.insert(
            "db".to_string(),
            ControlState {
                starts: 3,
                monitor: MonitorState::from_flags(0x2),
            },
        );
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        let db = loaded.processes["db"];
        assert_eq!(db.starts, 3);
        assert_eq!(db.monitor.flags(), 0x2);
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_file_is_human_readable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        let store = StateStore::new(&path);

        let mut state = PersistedState::new();
        state.processes.insert("web".to_string(), ControlState::default());
        store.save(&state).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"web\""));
        assert!(text.contains("\"starts\": 0"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_wrong_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, r#"{"version": "0.0.1", "processes": {}}"#).unwrap();

        let result = StateStore::new(&path).load();
        assert!(matches!(result, Err(OverseerError::Persistence(_))));
    }

    #[test]
    fn test_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(StateStore::new(&path).load().is_err());
    }

    #[test]
    fn test_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("subdir").join("state.json");
        let store = StateStore::new(&path);

        store.save(&PersistedState::new()).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }
}
