//! Serializes the registry to `status.json` (or whatever path the caller chooses) after
//! every significant transition. The on-disk snapshot is a derived output consumed by
//! cooperating CLIs, never a source of truth: writes are atomic and reads are
//! best-effort, so a torn or missing file never blocks the engine.

use crate::process::ProcessState;
use fs::file::{FileReader, FileRenamer, FileWriter};
use fs::LocalFile;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: Option<u32>,
    pub started_at: Option<u128>,
    pub config: serde_json::Value,
    pub state: ProcessState,
    pub restarts: u32,
    pub uptime_ms: u64,
    pub healthy: Option<bool>,
}

/// `name -> ProcessSnapshot`, matching the external `StateSnapshot` shape.
pub type StateSnapshot = BTreeMap<String, ProcessSnapshot>;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write snapshot: {0}")]
    Write(#[from] fs::file::writer::WriteError),
    #[error("failed to fsync snapshot: {0}")]
    Sync(io::Error),
    #[error("failed to rename snapshot into place: {0}")]
    Rename(io::Error),
}

/// Owns one on-disk snapshot path. The engine holds one per state directory
/// (`status.json`); `dump.json` and `last-config.json` reuse the same machinery with a
/// different path.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replaces the snapshot: write to a temp file beside the target, fsync
    /// it, then rename over the target. A reader of `self.path()` never observes a
    /// partially written file.
    pub fn write(&self, snapshot: &StateSnapshot) -> Result<(), StateStoreError> {
        let json = serde_json::to_string_pretty(snapshot)?;

        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let tmp_name = format!(
            ".{}.tmp",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("state-store")
        );
        let tmp_path = dir.join(tmp_name);

        LocalFile.write(&tmp_path, json)?;

        let file = File::open(&tmp_path).map_err(StateStoreError::Sync)?;
        file.sync_all().map_err(StateStoreError::Sync)?;
        drop(file);

        LocalFile.rename(&tmp_path, &self.path).map_err(StateStoreError::Rename)
    }

    /// Best-effort read: any failure (missing file, torn write from an older crash,
    /// invalid JSON) is logged and treated as "no snapshot" rather than propagated.
    pub fn read(&self) -> Option<StateSnapshot> {
        let contents = match LocalFile.read(&self.path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "no readable state snapshot");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "state snapshot is corrupt, ignoring");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StateSnapshot {
        let mut snapshot = StateSnapshot::new();
        snapshot.insert(
            "web".to_string(),
            ProcessSnapshot {
                pid: Some(1234),
                started_at: Some(1_000),
                config: serde_json::json!({"script": "./server"}),
                state: ProcessState::Running,
                restarts: 2,
                uptime_ms: 5_000,
                healthy: Some(true),
            },
        );
        snapshot
    }

    #[test]
    fn write_then_read_round_trips() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = StateStore::new(tempdir.path().join("status.json"));

        store.write(&sample()).unwrap();
        let read_back = store.read().unwrap();

        assert_eq!(read_back["web"].pid, Some(1234));
        assert_eq!(read_back["web"].restarts, 2);
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = StateStore::new(tempdir.path().join("status.json"));
        store.write(&sample()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(tempdir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("status.json")]);
    }

    #[test]
    fn reading_a_missing_file_returns_none_instead_of_erroring() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = StateStore::new(tempdir.path().join("does-not-exist.json"));
        assert!(store.read().is_none());
    }

    #[test]
    fn reading_corrupt_json_returns_none_instead_of_erroring() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("status.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = StateStore::new(path);
        assert!(store.read().is_none());
    }

    #[test]
    fn a_second_write_fully_replaces_the_first() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = StateStore::new(tempdir.path().join("status.json"));

        store.write(&sample()).unwrap();
        store.write(&StateSnapshot::new()).unwrap();

        assert!(store.read().unwrap().is_empty());
    }
}
