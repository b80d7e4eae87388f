//! Keyed cache of the bootstrapped base rootfs.
//!
//! An entry is a single `base-rootfs-<key>.tar.gz`. It is written to a
//! temporary name in the same directory and renamed into place once `tar`
//! has succeeded, so a keyed entry is either complete or absent. Saves take
//! a non-blocking lock; a save that finds the lock held is skipped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{info, warn};

use super::{CacheKey, CacheOutcome, SaveOutcome};
use crate::artifact::filesystem::{ensure_dir, remove_tree};
use crate::artifact::tarball;
use crate::process::CommandExecutor;

const LOCK_FILE_NAME: &str = ".base-rootfs.lock";

#[derive(Debug, Clone)]
pub struct RootfsCache {
    root: PathBuf,
    key: CacheKey,
}

impl RootfsCache {
    pub fn new(root: impl Into<PathBuf>, key: CacheKey) -> Self {
        Self {
            root: root.into(),
            key,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(format!("base-rootfs-{}.tar.gz", self.key))
    }

    /// Path of the keyed artifact, if one is present.
    pub fn exists(&self) -> Option<PathBuf> {
        let path = self.artifact_path();
        path.is_file().then_some(path)
    }

    /// Extract `artifact` into `dest` after checking its integrity.
    pub fn restore(&self, exec: &dyn CommandExecutor, artifact: &Path, dest: &Path) -> Result<()> {
        tarball::verify_tar_gz(artifact)
            .with_context(|| format!("Cached rootfs is corrupt: {}", artifact.display()))?;
        if let Err(e) = tarball::unpack(exec, artifact, dest) {
            if let Err(cleanup) = remove_tree(dest) {
                warn!("{:#}", cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Populate `dest` from the cache. Never fails: anything that keeps the
    /// entry from being used comes back as a fallback, and the entry is
    /// dropped so the rebuilt rootfs replaces it.
    pub fn try_restore(&self, exec: &dyn CommandExecutor, dest: &Path) -> CacheOutcome {
        let Some(artifact) = self.exists() else {
            return CacheOutcome::Miss;
        };

        info!("Restoring base rootfs from cache...");
        match self.restore(exec, &artifact, dest) {
            Ok(()) => {
                info!("Base rootfs restored from cache");
                CacheOutcome::Hit
            }
            Err(e) => {
                warn!("Discarding cache entry {}: {:#}", artifact.display(), e);
                if let Err(e) = remove_tree(&artifact) {
                    warn!("{:#}", e);
                }
                CacheOutcome::Fallback(format!("{:#}", e))
            }
        }
    }

    /// Archive `src_dir` into the keyed artifact.
    pub fn save(&self, exec: &dyn CommandExecutor, src_dir: &Path) -> SaveOutcome {
        match self.save_inner(exec, src_dir) {
            Ok(Some(path)) => {
                info!("Base rootfs cached at {}", path.display());
                SaveOutcome::Saved(path)
            }
            Ok(None) => {
                let reason = "another build holds the cache lock".to_string();
                warn!("Skipping cache save: {}", reason);
                SaveOutcome::Skipped(reason)
            }
            Err(e) => {
                warn!("Failed to save base rootfs to cache: {:#}", e);
                SaveOutcome::Skipped(format!("{:#}", e))
            }
        }
    }

    fn save_inner(&self, exec: &dyn CommandExecutor, src_dir: &Path) -> Result<Option<PathBuf>> {
        ensure_dir(&self.root)?;

        let Some(_lock) = CacheLock::try_acquire(&self.root.join(LOCK_FILE_NAME))? else {
            return Ok(None);
        };

        info!("Saving base rootfs to cache...");
        let dest = self.artifact_path();
        let tmp = self.root.join(tmp_name(&format!(".base-rootfs-{}", self.key)));

        let written = tarball::pack_dir(exec, src_dir, &tmp).and_then(|()| {
            std::fs::rename(&tmp, &dest)
                .with_context(|| format!("Failed to move {} into place", tmp.display()))
        });
        if let Err(e) = written {
            if let Err(cleanup) = remove_tree(&tmp) {
                warn!("{:#}", cleanup);
            }
            return Err(e);
        }

        Ok(Some(dest))
    }
}

/// Exclusive advisory lock, released when dropped.
///
/// The lock file is never unlinked: removing it while held would let a
/// second process lock a fresh inode at the same path.
#[derive(Debug)]
struct CacheLock {
    _file: File,
}

impl CacheLock {
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        Ok(Some(CacheLock { _file: file }))
    }
}

fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{prefix}.tmp-{}-{n}", std::process::id())
}
