//! Host apt archive cache, bind-mounted into a rootfs for the duration of a
//! package install.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::artifact::filesystem::ensure_dir;
use crate::config::APT_ARCHIVES_DIR;
use crate::process::{CommandExecutor, CommandSpec};

/// Bind mount of `<cache_root>/packages/apt` onto
/// `<rootfs>/var/cache/apt/archives`.
///
/// Unmounted by [`release`](Self::release), or on drop if the install
/// between mount and release bailed out early.
pub struct PackageCacheMount<'a> {
    exec: &'a dyn CommandExecutor,
    target: PathBuf,
    mounted: bool,
}

impl<'a> PackageCacheMount<'a> {
    pub fn host_dir(cache_root: &Path) -> PathBuf {
        cache_root.join("packages").join("apt")
    }

    pub fn mount(exec: &'a dyn CommandExecutor, cache_root: &Path, rootfs: &Path) -> Result<Self> {
        let source = Self::host_dir(cache_root);
        let target = rootfs.join(APT_ARCHIVES_DIR);
        ensure_dir(&source).context("Failed to create package cache directory")?;
        ensure_dir(&target).context("Failed to create apt archives directory in rootfs")?;

        exec.run(
            &CommandSpec::new("mount")
                .arg("--bind")
                .arg_path(&source)
                .arg_path(&target),
        )
        .context("Failed to mount package cache")?;

        debug!("Package cache mounted at {}", target.display());
        Ok(Self {
            exec,
            target,
            mounted: true,
        })
    }

    /// Unmount now and report the result.
    pub fn release(mut self) -> Result<()> {
        self.unmount()
    }

    fn unmount(&mut self) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
        self.mounted = false;
        self.exec
            .run(&CommandSpec::new("umount").arg_path(&self.target))
            .context("Failed to unmount package cache")
    }
}

impl Drop for PackageCacheMount<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.unmount() {
            warn!("{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingExecutor;
    use tempfile::TempDir;

    #[test]
    fn mount_and_release() {
        let temp = TempDir::new().unwrap();
        let cache_root = temp.path().join("cache");
        let rootfs = temp.path().join("target");
        let exec = RecordingExecutor::new();

        let mount = PackageCacheMount::mount(&exec, &cache_root, &rootfs).unwrap();
        assert!(cache_root.join("packages/apt").is_dir());
        assert!(rootfs.join("var/cache/apt/archives").is_dir());
        mount.release().unwrap();

        let lines = exec.command_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            format!(
                "mount --bind {} {}",
                cache_root.join("packages/apt").display(),
                rootfs.join("var/cache/apt/archives").display()
            )
        );
        assert_eq!(
            lines[1],
            format!("umount {}", rootfs.join("var/cache/apt/archives").display())
        );
    }

    #[test]
    fn drop_unmounts_once() {
        let temp = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        {
            let _mount = PackageCacheMount::mount(&exec, temp.path(), &temp.path().join("r")).unwrap();
        }
        assert_eq!(exec.command_lines().iter().filter(|l| l.starts_with("umount")).count(), 1);
    }

    #[test]
    fn failed_mount_has_nothing_to_unmount() {
        let temp = TempDir::new().unwrap();
        let exec = RecordingExecutor::new().fail_on("mount --bind");
        assert!(PackageCacheMount::mount(&exec, temp.path(), &temp.path().join("r")).is_err());
        assert!(!exec.ran("umount"));
    }
}
