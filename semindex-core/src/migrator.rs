//! Converts a legacy single-file snapshot to the sharded v3 layout.

use crate::snapshot::{FileMetadata, ShardedSnapshotManager};
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk shape of a pre-v3 snapshot. `file_metadata` is present from v2
/// onward; a pure v1 snapshot only lists paths and forces a `stat` per file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LegacySnapshot {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    file_metadata: Option<BTreeMap<String, FileMetadata>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationResult {
    pub success: bool,
    pub files_count: usize,
    pub skipped_count: usize,
    pub already_migrated: bool,
}

pub struct SnapshotMigrator {
    snapshot_base: PathBuf,
    manager: ShardedSnapshotManager,
}

impl SnapshotMigrator {
    pub fn new(snapshot_base: impl Into<PathBuf>) -> Self {
        let snapshot_base = snapshot_base.into();
        Self {
            manager: ShardedSnapshotManager::new(snapshot_base.clone()),
            snapshot_base,
        }
    }

    fn legacy_path(&self, collection: &str) -> PathBuf {
        self.snapshot_base.join(format!("{collection}.json"))
    }

    fn backup_path(&self, collection: &str) -> PathBuf {
        self.snapshot_base.join(format!("{collection}.json.backup"))
    }

    /// Idempotent precondition for load: migrates if a legacy file exists
    /// and the sharded directory doesn't, does nothing otherwise.
    pub fn ensure_migrated(
        &self,
        collection: &str,
        codebase_path: &str,
        shard_count: usize,
        virtual_nodes: usize,
        timestamp: i64,
    ) -> Result<MigrationResult> {
        self.migrate(collection, codebase_path, shard_count, virtual_nodes, timestamp)
    }

    pub fn migrate(
        &self,
        collection: &str,
        codebase_path: &str,
        shard_count: usize,
        virtual_nodes: usize,
        timestamp: i64,
    ) -> Result<MigrationResult> {
        if self.manager.exists(collection) {
            return Ok(MigrationResult {
                success: true,
                files_count: 0,
                skipped_count: 0,
                already_migrated: true,
            });
        }

        let legacy_path = self.legacy_path(collection);
        if !legacy_path.is_file() {
            return Ok(MigrationResult {
                success: true,
                files_count: 0,
                skipped_count: 0,
                already_migrated: false,
            });
        }

        let content = fs::read_to_string(&legacy_path)?;
        fs::copy(&legacy_path, self.backup_path(collection))?;

        let legacy: LegacySnapshot = match serde_json::from_str(&content) {
            Ok(legacy) => legacy,
            Err(e) => {
                return Err(crate::SemIndexError::MigrationFailed(e.to_string()));
            }
        };

        let mut files = BTreeMap::new();
        let mut skipped = 0usize;

        if let Some(file_metadata) = legacy.file_metadata {
            files = file_metadata;
        } else {
            for relative_path in &legacy.files {
                let absolute = Path::new(codebase_path).join(relative_path);
                match stat_file_metadata(&absolute) {
                    Some(meta) => {
                        files.insert(relative_path.clone(), meta);
                    }
                    None => skipped += 1,
                }
            }
        }

        let files_count = files.len();
        self.manager.save(
            collection,
            codebase_path,
            shard_count,
            virtual_nodes,
            files,
            timestamp,
        )?;

        fs::remove_file(&legacy_path)?;

        Ok(MigrationResult {
            success: true,
            files_count,
            skipped_count: skipped,
            already_migrated: false,
        })
    }
}

fn stat_file_metadata(path: &Path) -> Option<FileMetadata> {
    let metadata = fs::metadata(path).ok()?;
    let mtime = metadata
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs_f64()
        * 1000.0;
    let bytes = fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let content_hash = hex::encode(hasher.finalize());
    Some(FileMetadata {
        mtime,
        size: metadata.len(),
        content_hash,
    })
}
