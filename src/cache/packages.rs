//! Cached bootloader package bundles, one directory of `.deb` files per
//! boot mode.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{CacheOutcome, SaveOutcome};
use crate::artifact::filesystem::{copy_matching, ensure_dir, glob_in, remove_tree};
use crate::config::{BIOS_PACKAGES, EFI_PACKAGES};

const PACKAGE_PATTERN: &str = "*.deb";

/// Firmware interface a package bundle targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootMode {
    Bios,
    Efi,
}

impl BootMode {
    pub const ALL: [BootMode; 2] = [BootMode::Bios, BootMode::Efi];

    /// Category directory name, both in the cache and in the carrier.
    pub fn name(self) -> &'static str {
        match self {
            BootMode::Bios => "bios",
            BootMode::Efi => "efi",
        }
    }

    pub fn packages(self) -> &'static [&'static str] {
        match self {
            BootMode::Bios => BIOS_PACKAGES,
            BootMode::Efi => EFI_PACKAGES,
        }
    }
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct PackageBundleCache {
    root: PathBuf,
}

impl PackageBundleCache {
    /// `cache_root` is the top-level cache directory; bundles live under
    /// `<cache_root>/packages/<mode>/`.
    pub fn new(cache_root: &Path) -> Self {
        Self {
            root: cache_root.join("packages"),
        }
    }

    pub fn dir(&self, mode: BootMode) -> PathBuf {
        self.root.join(mode.name())
    }

    /// At least one package file is cached for `mode`.
    pub fn exists(&self, mode: BootMode) -> bool {
        glob_in(&self.dir(mode), PACKAGE_PATTERN)
            .map(|matches| !matches.is_empty())
            .unwrap_or(false)
    }

    /// Copy the cached packages into `dest`. Returns the number copied.
    pub fn restore(&self, mode: BootMode, dest: &Path) -> Result<usize> {
        copy_matching(&self.dir(mode), PACKAGE_PATTERN, dest)
            .with_context(|| format!("Failed to restore {} packages from cache", mode))
    }

    pub fn try_restore(&self, mode: BootMode, dest: &Path) -> CacheOutcome {
        if !self.exists(mode) {
            return CacheOutcome::Miss;
        }
        match self.restore(mode, dest) {
            Ok(n) => {
                info!("Restored {} {} packages from cache", n, mode);
                CacheOutcome::Hit
            }
            Err(e) => {
                warn!("{:#}", e);
                CacheOutcome::Fallback(format!("{:#}", e))
            }
        }
    }

    /// Replace the cached bundle for `mode` with the packages in `src`.
    ///
    /// The new bundle is assembled next to the old one and swapped in, so a
    /// failed save leaves the previous bundle untouched.
    pub fn save(&self, mode: BootMode, src: &Path) -> SaveOutcome {
        match self.save_inner(mode, src) {
            Ok(path) => {
                info!("Cached {} packages at {}", mode, path.display());
                SaveOutcome::Saved(path)
            }
            Err(e) => {
                warn!("Failed to cache {} packages: {:#}", mode, e);
                SaveOutcome::Skipped(format!("{:#}", e))
            }
        }
    }

    fn save_inner(&self, mode: BootMode, src: &Path) -> Result<PathBuf> {
        ensure_dir(&self.root)?;
        let dest = self.dir(mode);
        let staging = self
            .root
            .join(format!(".{}.tmp-{}", mode.name(), std::process::id()));
        remove_tree(&staging)?;

        if let Err(e) = copy_matching(src, PACKAGE_PATTERN, &staging) {
            remove_tree(&staging)?;
            return Err(e);
        }

        remove_tree(&dest)?;
        std::fs::rename(&staging, &dest)
            .with_context(|| format!("Failed to move {} into place", staging.display()))?;
        Ok(dest)
    }
}
