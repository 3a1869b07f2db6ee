//! Resumable progress for long indexing runs, one checkpoint per collection.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CHECKPOINT_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Indexing,
    Deleting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub processed_files: Vec<String>,
    pub total_files: usize,
    pub timestamp: i64,
    pub phase: Phase,
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(snapshot_base: impl Into<PathBuf>, collection: &str) -> Self {
        let base: PathBuf = snapshot_base.into();
        Self {
            path: base.join(format!("{collection}.checkpoint.json")),
        }
    }

    pub fn save(&self, processed_files: &[String], total_files: usize, phase: Phase, now: i64) -> Result<()> {
        let checkpoint = Checkpoint {
            processed_files: processed_files.to_vec(),
            total_files,
            timestamp: now,
            phase,
        };
        let content = serde_json::to_string_pretty(&checkpoint)?;
        write_temp_then_rename(&self.path, &content)
    }

    /// Loads the checkpoint, self-deleting (and returning `None`) if it's
    /// older than [`CHECKPOINT_TTL`].
    pub fn load(&self, now: i64) -> Result<Option<Checkpoint>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .map_err(|e| crate::SemIndexError::MetaCorrupt(e.to_string()))?;

        let age = Duration::from_secs((now - checkpoint.timestamp).max(0) as u64);
        if age > CHECKPOINT_TTL {
            self.delete()?;
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    pub fn has(&self) -> bool {
        self.path.is_file()
    }

    pub fn delete(&self) -> Result<()> {
        if self.path.is_file() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Remaining work: `all` minus anything already recorded as processed.
    pub fn filter_processed(all: &[String], checkpoint: &Checkpoint) -> Vec<String> {
        let processed: HashSet<&str> = checkpoint.processed_files.iter().map(|s| s.as_str()).collect();
        all.iter()
            .filter(|p| !processed.contains(p.as_str()))
            .cloned()
            .collect()
    }
}

fn write_temp_then_rename(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "demo");
        store
            .save(&["a.rs".to_string()], 10, Phase::Indexing, 1_700_000_000)
            .unwrap();

        let loaded = store.load(1_700_000_000).unwrap().unwrap();
        assert_eq!(loaded.total_files, 10);
        assert_eq!(loaded.processed_files, vec!["a.rs".to_string()]);
    }

    #[test]
    fn has_reflects_presence() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "demo");
        assert!(!store.has());
        store.save(&[], 0, Phase::Indexing, 1).unwrap();
        assert!(store.has());
    }

    #[test]
    fn expired_checkpoint_self_deletes_on_load() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "demo");
        store.save(&[], 5, Phase::Indexing, 0).unwrap();

        let loaded = store.load(CHECKPOINT_TTL.as_secs() as i64 + 100).unwrap();
        assert!(loaded.is_none());
        assert!(!store.has());
    }

    #[test]
    fn filter_processed_excludes_recorded_files() {
        let checkpoint = Checkpoint {
            processed_files: vec!["a.rs".to_string()],
            total_files: 2,
            timestamp: 1,
            phase: Phase::Indexing,
        };
        let remaining = CheckpointStore::filter_processed(
            &["a.rs".to_string(), "b.rs".to_string()],
            &checkpoint,
        );
        assert_eq!(remaining, vec!["b.rs".to_string()]);
    }

    #[test]
    fn delete_removes_the_checkpoint_file() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "demo");
        store.save(&[], 0, Phase::Indexing, 1).unwrap();
        store.delete().unwrap();
        assert!(!store.has());
    }
}
