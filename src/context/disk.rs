//! On-disk tier of the context cache.
//!
//! One JSON file plus a sibling `.lock` file. Writers take an exclusive lock
//! on the lock file, write a temp file and rename it over the record, so a
//! reader in another process sees either the old or the new record.
//! Readers never lock and treat anything they cannot use as a miss.

use super::SystemContext;
use crate::config::Config;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Schema tag; records with any other tag are rebuilt.
pub const SCHEMA: &str = "forgor.context.v1";
pub const CACHE_FILE: &str = "context_cache.json";

/// What is persisted: the snapshot, its inventory fingerprint and build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub schema: String,
    pub fingerprint: String,
    pub built_at: u64,
    pub context: SystemContext,
}

impl CacheRecord {
    pub fn new(context: SystemContext, built_at: u64) -> Self {
        Self {
            schema: SCHEMA.to_string(),
            fingerprint: context.tools.fingerprint(),
            built_at,
            context,
        }
    }

    /// Right schema, fingerprint matching the inventory, inventory consistent.
    pub fn is_valid(&self) -> bool {
        self.schema == SCHEMA
            && self.fingerprint == self.context.tools.fingerprint()
            && self.context.tools.is_consistent()
    }
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    path: PathBuf,
}

impl DiskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location under the config directory.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(Config::config_dir()?.join(CACHE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Reads the record. Missing, unreadable, malformed, foreign-schema and
    /// fingerprint-mismatched files all count as a miss.
    pub fn load(&self) -> Option<CacheRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("No context cache at {}: {}", self.path.display(), e);
                return None;
            }
        };

        let record: CacheRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!("Ignoring malformed context cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        if !record.is_valid() {
            debug!(
                "Ignoring context cache {} (schema {}, fingerprint mismatch or inconsistent inventory)",
                self.path.display(),
                record.schema
            );
            return None;
        }
        Some(record)
    }

    /// Replaces the record atomically while holding the cross-process lock.
    pub fn store(&self, record: &CacheRecord) -> Result<()> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("{} has no parent directory", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let _lock = self.acquire_lock()?;

        let data = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension(format!("tmp.{}", std::process::id()));
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("Failed to move context cache into {}", self.path.display()));
        }

        debug!("Persisted context cache to {}", self.path.display());
        Ok(())
    }

    /// Deletes the record. Returns whether there was one.
    pub fn clear(&self) -> Result<bool> {
        let _lock = self.acquire_lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }

    /// Exclusive lock, released when the returned file is dropped.
    fn acquire_lock(&self) -> Result<File> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
        Ok(file)
    }
}
