//! Parallel change detection against a previous sharded snapshot.

use crate::hash_ring::HashRing;
use crate::merkle::merkle_root;
use crate::snapshot::{FileMetadata, LoadedSnapshot, ShardedSnapshotManager};
use crate::Result;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// mtime/size differences within this tolerance are treated as "the file
/// didn't change" without re-reading it. Accommodates second-resolution
/// mtimes on some filesystems.
const MTIME_TOLERANCE_MS: f64 = 1000.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Per-file work done against the previous snapshot.
pub struct ChangeDetector {
    codebase_path: std::path::PathBuf,
    collection: String,
    shard_count: usize,
    virtual_nodes: usize,
    manager: ShardedSnapshotManager,
    previous: Option<LoadedSnapshot>,
}

impl ChangeDetector {
    pub fn new(
        codebase_path: impl Into<std::path::PathBuf>,
        snapshot_base: impl Into<std::path::PathBuf>,
        collection: impl Into<String>,
        shard_count: usize,
        virtual_nodes: usize,
    ) -> Self {
        Self {
            codebase_path: codebase_path.into(),
            collection: collection.into(),
            shard_count,
            virtual_nodes,
            manager: ShardedSnapshotManager::new(snapshot_base),
            previous: None,
        }
    }

    /// Loads the previous snapshot if one exists. Returns whether it did.
    pub fn initialize(&mut self) -> Result<bool> {
        match self.manager.load(&self.collection) {
            Ok(snapshot) => {
                self.previous = Some(snapshot);
                Ok(true)
            }
            Err(crate::SemIndexError::NotIndexed) => {
                self.previous = None;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Classify every file in `current_files` (absolute paths) as
    /// added/modified/unchanged relative to the previous snapshot, plus the
    /// set of paths present in the snapshot but absent from `current_files`.
    pub fn detect_changes(&self, current_files: &[std::path::PathBuf]) -> ChangeSet {
        let ring = HashRing::new(self.shard_count, self.virtual_nodes);
        let mut groups: Vec<Vec<&std::path::PathBuf>> = vec![Vec::new(); self.shard_count];
        let relative_of: Vec<String> = current_files
            .iter()
            .map(|p| relative_path(&self.codebase_path, p))
            .collect();
        for (path, relative) in current_files.iter().zip(relative_of.iter()) {
            groups[ring.shard_of(relative)].push(path);
        }

        let per_shard: Vec<(Vec<String>, Vec<String>, Vec<String>)> = groups
            .into_par_iter()
            .map(|group| self.classify_group(&group))
            .collect();

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut unchanged = Vec::new();
        for (a, m, u) in per_shard {
            added.extend(a);
            modified.extend(m);
            unchanged.extend(u);
        }

        let current_set: HashSet<&str> = relative_of.iter().map(|s| s.as_str()).collect();
        let deleted = match &self.previous {
            Some(prev) => prev
                .relative_paths()
                .filter(|p| !current_set.contains(p.as_str()))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        ChangeSet {
            added,
            modified,
            deleted,
            unchanged,
        }
    }

    fn classify_group(
        &self,
        group: &[&std::path::PathBuf],
    ) -> (Vec<String>, Vec<String>, Vec<String>) {
        group
            .par_iter()
            .map(|path| self.classify_one(path))
            .fold(
                || (Vec::new(), Vec::new(), Vec::new()),
                |mut acc, (relative, class)| {
                    match class {
                        Classification::Added => acc.0.push(relative),
                        Classification::Modified => acc.1.push(relative),
                        Classification::Unchanged => acc.2.push(relative),
                    }
                    acc
                },
            )
            .reduce(
                || (Vec::new(), Vec::new(), Vec::new()),
                |mut a, b| {
                    a.0.extend(b.0);
                    a.1.extend(b.1);
                    a.2.extend(b.2);
                    a
                },
            )
    }

    fn classify_one(&self, path: &Path) -> (String, Classification) {
        let relative = relative_path(&self.codebase_path, path);
        let stat = std::fs::metadata(path).ok();
        let (mtime, size) = match &stat {
            Some(meta) => (mtime_ms(meta), meta.len()),
            None => (0.0, 0),
        };

        let previous = self
            .previous
            .as_ref()
            .and_then(|snap| snap.file_metadata(&relative));

        let class = match previous {
            None => Classification::Added,
            Some(prev) => {
                let fast_path_hit = (prev.mtime - mtime).abs() < MTIME_TOLERANCE_MS && prev.size == size;
                let hash = if fast_path_hit {
                    prev.content_hash.clone()
                } else {
                    hash_file(path)
                };
                if hash == prev.content_hash {
                    Classification::Unchanged
                } else {
                    Classification::Modified
                }
            }
        };
        (relative, class)
    }

    /// Rebuilds the current meta root (full content hashes, no fast path)
    /// and compares it to the previous snapshot's. A difference here that
    /// `detect_changes` didn't report would indicate hash-drift.
    pub fn needs_reindex(&self, current_files: &[std::path::PathBuf]) -> bool {
        let previous_root = match &self.previous {
            Some(snap) => snap.meta.meta_root_hash.clone(),
            None => return true,
        };

        let ring = HashRing::new(self.shard_count, self.virtual_nodes);
        let mut by_shard: Vec<Vec<(String, String)>> = vec![Vec::new(); self.shard_count];
        for path in current_files {
            let relative = relative_path(&self.codebase_path, path);
            let hash = hash_file(path);
            let shard = ring.shard_of(&relative);
            by_shard[shard].push((relative, hash));
        }

        let shard_roots: Vec<String> = by_shard
            .into_par_iter()
            .map(|pairs| merkle_root(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
            .collect();

        let meta_root = merkle_root(
            shard_roots
                .iter()
                .enumerate()
                .map(|(i, root)| (format!("shard-{i:02}.json"), root.clone()))
                .collect::<Vec<_>>()
                .iter()
                .map(|(name, root)| (name.as_str(), root.as_str())),
        );

        meta_root != previous_root
    }

    /// Hashes every file (no fast path) and persists a new snapshot.
    pub fn update_snapshot(&self, current_files: &[std::path::PathBuf], timestamp: i64) -> Result<()> {
        let mut files = BTreeMap::new();
        for path in current_files {
            let relative = relative_path(&self.codebase_path, path);
            let meta = std::fs::metadata(path)?;
            files.insert(
                relative,
                FileMetadata {
                    mtime: mtime_ms(&meta),
                    size: meta.len(),
                    content_hash: hash_file(path),
                },
            );
        }
        self.manager.save(
            &self.collection,
            &self.codebase_path.to_string_lossy(),
            self.shard_count,
            self.virtual_nodes,
            files,
            timestamp,
        )?;
        Ok(())
    }

    pub fn delete_snapshot(&self) -> Result<()> {
        self.manager.delete(&self.collection)
    }
}

enum Classification {
    Added,
    Modified,
    Unchanged,
}

fn mtime_ms(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

fn hash_file(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            hex::encode(hasher.finalize())
        }
        Err(_) => String::new(),
    }
}

fn relative_path(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn first_run_classifies_everything_as_added() {
        let codebase = tempdir().unwrap();
        let snapshots = tempdir().unwrap();
        write(&codebase.path().join("a.rs"), "fn a() {}");

        let mut detector =
            ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 4, 20);
        assert!(!detector.initialize().unwrap());

        let changes = detector.detect_changes(&[codebase.path().join("a.rs")]);
        assert_eq!(changes.added, vec!["a.rs".to_string()]);
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn unchanged_file_is_reported_unchanged_after_snapshot() {
        let codebase = tempdir().unwrap();
        let snapshots = tempdir().unwrap();
        write(&codebase.path().join("a.rs"), "fn a() {}");

        let detector = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        detector
            .update_snapshot(&[codebase.path().join("a.rs")], 1)
            .unwrap();

        let mut detector2 = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        detector2.initialize().unwrap();
        let changes = detector2.detect_changes(&[codebase.path().join("a.rs")]);
        assert_eq!(changes.unchanged, vec!["a.rs".to_string()]);
        assert!(changes.modified.is_empty());
        assert!(changes.added.is_empty());
    }

    #[test]
    fn modified_content_is_detected_even_with_fast_path_hints_stale() {
        let codebase = tempdir().unwrap();
        let snapshots = tempdir().unwrap();
        write(&codebase.path().join("a.rs"), "fn a() {}");

        let detector = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        detector
            .update_snapshot(&[codebase.path().join("a.rs")], 1)
            .unwrap();

        // Force a size change so the fast path can't mask a real edit.
        write(&codebase.path().join("a.rs"), "fn a_longer_body() {}");

        let mut detector2 = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        detector2.initialize().unwrap();
        let changes = detector2.detect_changes(&[codebase.path().join("a.rs")]);
        assert_eq!(changes.modified, vec!["a.rs".to_string()]);
    }

    #[test]
    fn deleted_files_are_those_in_previous_but_not_current() {
        let codebase = tempdir().unwrap();
        let snapshots = tempdir().unwrap();
        write(&codebase.path().join("a.rs"), "fn a() {}");
        write(&codebase.path().join("b.rs"), "fn b() {}");

        let detector = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        detector
            .update_snapshot(
                &[codebase.path().join("a.rs"), codebase.path().join("b.rs")],
                1,
            )
            .unwrap();

        let mut detector2 = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        detector2.initialize().unwrap();
        let changes = detector2.detect_changes(&[codebase.path().join("a.rs")]);
        assert_eq!(changes.deleted, vec!["b.rs".to_string()]);
    }

    #[test]
    fn needs_reindex_is_true_with_no_previous_snapshot() {
        let codebase = tempdir().unwrap();
        let snapshots = tempdir().unwrap();
        write(&codebase.path().join("a.rs"), "fn a() {}");

        let detector = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        assert!(detector.needs_reindex(&[codebase.path().join("a.rs")]));
    }

    #[test]
    fn needs_reindex_is_false_when_tree_matches_snapshot() {
        let codebase = tempdir().unwrap();
        let snapshots = tempdir().unwrap();
        write(&codebase.path().join("a.rs"), "fn a() {}");

        let detector = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        detector
            .update_snapshot(&[codebase.path().join("a.rs")], 1)
            .unwrap();

        let mut detector2 = ChangeDetector::new(codebase.path(), snapshots.path(), "demo", 2, 20);
        detector2.initialize().unwrap();
        assert!(!detector2.needs_reindex(&[codebase.path().join("a.rs")]));
    }
}
