//! Sharded snapshot persistence.
//!
//! A snapshot is a directory: `meta.json` plus one `shard-NN.json` per shard.
//! Each shard file stores `relative_path -> FileMetadata` for the paths hashed
//! into that shard, plus its own Merkle root over those records. `meta.json`
//! stores the hash-ring parameters, a checksum per shard file, and the meta
//! root (the Merkle root over `shard_name -> shard_root`), so a single
//! comparison detects whether anything in the tree changed before paying the
//! cost of walking every shard.
//!
//! Snapshots publish via the same idiom as a single-file atomic write,
//! raised to directory granularity: build the new snapshot under a sibling
//! temp directory, `fsync` each file, then `rename` the temp directory over
//! the published one. A reader never observes a partially-written snapshot.

use crate::hash_ring::HashRing;
use crate::merkle::merkle_root;
use crate::{Result, SemIndexError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_SCHEMA_VERSION: &str = "3";

/// Per-file record kept in a shard: the `(mtime, size)` hint plus the
/// content hash, enough to decide "changed or not" without re-reading bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    pub mtime: f64,
    pub size: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardFile {
    pub shard_index: usize,
    pub files: BTreeMap<String, FileMetadata>,
    pub merkle_root: String,
}

impl ShardFile {
    pub fn new(shard_index: usize, files: BTreeMap<String, FileMetadata>) -> Self {
        let merkle_root = merkle_root(
            files
                .iter()
                .map(|(path, meta)| (path.as_str(), meta.content_hash.as_str())),
        );
        Self {
            shard_index,
            files,
            merkle_root,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashRingParams {
    pub virtual_nodes: usize,
    pub shard_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSummary {
    pub index: usize,
    pub file_count: usize,
    pub merkle_root: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub version: String,
    pub codebase_path: String,
    pub timestamp: i64,
    pub hash_ring: HashRingParams,
    pub shards: Vec<ShardSummary>,
    pub meta_root_hash: String,
}

fn shard_file_name(shard: usize) -> String {
    format!("shard-{shard:02}.json")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A fully loaded snapshot, shards already verified against their checksums
/// and merged so lookups don't need to know the shard layout.
pub struct LoadedSnapshot {
    pub meta: SnapshotMeta,
    pub files: BTreeMap<String, FileMetadata>,
    pub ring: HashRing,
}

impl LoadedSnapshot {
    pub fn file_metadata(&self, relative_path: &str) -> Option<&FileMetadata> {
        self.files.get(relative_path)
    }

    pub fn shard_of(&self, relative_path: &str) -> usize {
        self.ring.shard_of(relative_path)
    }

    pub fn relative_paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }
}

/// Reads, writes, and atomically publishes sharded snapshots under
/// `<snapshot_base>/<collection>/`.
pub struct ShardedSnapshotManager {
    snapshot_base: PathBuf,
}

impl ShardedSnapshotManager {
    pub fn new(snapshot_base: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_base: snapshot_base.into(),
        }
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.snapshot_base.join(collection)
    }

    pub fn exists(&self, collection: &str) -> bool {
        self.collection_dir(collection).join("meta.json").is_file()
    }

    pub fn delete(&self, collection: &str) -> Result<()> {
        let dir = self.collection_dir(collection);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Load a snapshot, verifying every shard's checksum against the
    /// recorded value in `meta.json`. Shard roots are placed at the index
    /// declared in meta, not load order, since shards load in parallel.
    pub fn load(&self, collection: &str) -> Result<LoadedSnapshot> {
        let dir = self.collection_dir(collection);
        let meta_path = dir.join("meta.json");
        if !meta_path.is_file() {
            return Err(SemIndexError::NotIndexed);
        }
        let meta_content = fs::read_to_string(&meta_path)?;
        let meta: SnapshotMeta = serde_json::from_str(&meta_content)
            .map_err(|e| SemIndexError::MetaCorrupt(e.to_string()))?;

        let ring = HashRing::new(meta.hash_ring.shard_count, meta.hash_ring.virtual_nodes);

        let loaded: Vec<Result<ShardFile>> = meta
            .shards
            .par_iter()
            .map(|summary| self.load_shard(&dir, summary))
            .collect();

        let mut files = BTreeMap::new();
        for shard in loaded {
            let shard = shard?;
            files.extend(shard.files);
        }

        Ok(LoadedSnapshot { meta, files, ring })
    }

    fn load_shard(&self, dir: &Path, summary: &ShardSummary) -> Result<ShardFile> {
        let name = shard_file_name(summary.index);
        let path = dir.join(&name);
        if !path.is_file() {
            return Err(SemIndexError::ShardMissing(summary.index));
        }
        let bytes = fs::read(&path)?;
        let checksum = sha256_hex(&bytes);
        if checksum != summary.checksum {
            return Err(SemIndexError::ChecksumMismatch(summary.index));
        }
        let parsed: ShardFile = serde_json::from_slice(&bytes)
            .map_err(|e| SemIndexError::MetaCorrupt(format!("shard {}: {e}", summary.index)))?;
        Ok(parsed)
    }

    /// Partition `files` by the shard router, write one shard file per
    /// shard, compute the meta root, and atomically publish the directory.
    /// `timestamp` is the caller-supplied unix-epoch seconds (never read
    /// from the clock inside core, so runs stay reproducible in tests).
    pub fn save(
        &self,
        collection: &str,
        codebase_path: &str,
        shard_count: usize,
        virtual_nodes: usize,
        files: BTreeMap<String, FileMetadata>,
        timestamp: i64,
    ) -> Result<SnapshotMeta> {
        let ring = HashRing::new(shard_count, virtual_nodes);
        let mut by_shard: Vec<BTreeMap<String, FileMetadata>> = vec![BTreeMap::new(); shard_count];
        for (path, meta) in files {
            let shard = ring.shard_of(&path);
            by_shard[shard].insert(path, meta);
        }

        fs::create_dir_all(&self.snapshot_base)?;
        self.clean_stale_temp_dirs(collection)?;
        let tmp_dir = self
            .snapshot_base
            .join(format!("{collection}.tmp.{timestamp}-{}", std::process::id()));
        fs::create_dir_all(&tmp_dir)?;

        let save_result = (|| -> Result<SnapshotMeta> {
            let mut shards = Vec::with_capacity(shard_count);
            for (shard_index, shard_files) in by_shard.into_iter().enumerate() {
                let shard = ShardFile::new(shard_index, shard_files);
                let name = shard_file_name(shard_index);
                let content = serde_json::to_string_pretty(&shard)?;
                let checksum = sha256_hex(content.as_bytes());
                write_and_sync(&tmp_dir.join(&name), &content)?;
                shards.push(ShardSummary {
                    index: shard_index,
                    file_count: shard.files.len(),
                    merkle_root: shard.merkle_root,
                    checksum,
                });
            }

            let meta_root_hash = merkle_root(
                shards
                    .iter()
                    .map(|s| (shard_file_name(s.index), s.merkle_root.clone()))
                    .collect::<Vec<_>>()
                    .iter()
                    .map(|(name, root)| (name.as_str(), root.as_str())),
            );

            let meta = SnapshotMeta {
                version: SNAPSHOT_SCHEMA_VERSION.to_string(),
                codebase_path: codebase_path.to_string(),
                timestamp,
                hash_ring: HashRingParams {
                    virtual_nodes,
                    shard_count,
                },
                shards,
                meta_root_hash,
            };
            let meta_content = serde_json::to_string_pretty(&meta)?;
            write_and_sync(&tmp_dir.join("meta.json"), &meta_content)?;
            Ok(meta)
        })();

        let meta = match save_result {
            Ok(meta) => meta,
            Err(e) => {
                let _ = fs::remove_dir_all(&tmp_dir);
                return Err(e);
            }
        };

        let dir = self.collection_dir(collection);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::rename(&tmp_dir, &dir)?;
        Ok(meta)
    }

    fn clean_stale_temp_dirs(&self, collection: &str) -> Result<()> {
        let prefix = format!("{collection}.tmp.");
        if !self.snapshot_base.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.snapshot_base)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(&prefix)
            {
                let _ = fs::remove_dir_all(entry.path());
            }
        }
        Ok(())
    }
}

fn write_and_sync(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;
    let mut file = fs::File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}
