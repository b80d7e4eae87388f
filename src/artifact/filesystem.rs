//! Filesystem primitives used by every phase.
//!
//! Thin wrappers around `std::fs` that attach path context to errors and
//! encode the small policies the phases rely on (removal of a missing path
//! is not an error, writes create parent directories, symlinks replace
//! whatever was at the link path).

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Create a directory and all of its parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// Write `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write file: {}", path.display()))
}

/// Copy a single file, creating the destination's parent directories.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Recursively copy a directory, preserving symlinks.
///
/// Ownership is not preserved; rootfs trees are copied with `cp -a` through
/// the command executor instead.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            symlink_force(&target, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("Failed to copy file: {}", src_path.display()))?;
        }
    }

    Ok(())
}

/// Remove a file or directory tree. A missing path is not an error.
pub fn remove_tree(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", path.display()));
        }
    };

    if meta.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))
    } else {
        fs::remove_file(path).with_context(|| format!("Failed to remove file: {}", path.display()))
    }
}

/// Remove a tree, retrying a few times for files still held open by a
/// just-exited tool. Gives up with a warning.
pub fn remove_tree_with_retries(path: &Path, attempts: u32, delay: Duration) -> bool {
    for attempt in 1..=attempts {
        match remove_tree(path) {
            Ok(()) => return true,
            Err(e) if attempt < attempts => {
                warn!("Cleanup attempt {} failed ({:#}), retrying...", attempt, e);
                thread::sleep(delay);
            }
            Err(e) => {
                warn!(
                    "Failed to clean up {} after {} attempts: {:#}",
                    path.display(),
                    attempts,
                    e
                );
            }
        }
    }
    false
}

/// Create (or replace) a symlink at `link` pointing to `target`.
pub fn symlink_force(target: &Path, link: &Path) -> Result<()> {
    if link.exists() || link.is_symlink() {
        fs::remove_file(link)
            .with_context(|| format!("Failed to replace existing file: {}", link.display()))?;
    }
    if let Some(parent) = link.parent() {
        ensure_dir(parent)?;
    }
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("Failed to create symlink: {}", link.display()))
}

/// Set mode 0755 on a file.
pub fn make_executable(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to make executable: {}", path.display()))
}

/// Expand a glob pattern rooted at `dir` (e.g. `*.deb`). Results are sorted.
pub fn glob_in(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let full = format!("{}/{}", escaped, pattern);
    let mut paths = glob::glob(&full)
        .with_context(|| format!("Invalid glob pattern: {}", full))?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

/// Match of `pattern` in `dir` carrying the highest version.
///
/// File names are compared by their runs of digits taken as integers, so
/// `vmlinuz-6.1.0-10-amd64` is newer than `vmlinuz-6.1.0-9-amd64`.
pub fn glob_newest(dir: &Path, pattern: &str) -> Result<Option<PathBuf>> {
    Ok(glob_in(dir, pattern)?
        .into_iter()
        .max_by(|a, b| version_segments(a).cmp(&version_segments(b)).then_with(|| a.cmp(b))))
}

fn version_segments(path: &Path) -> Vec<u64> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .map(|run| run.parse().unwrap_or(u64::MAX))
        .collect()
}

/// Copy every file in `src_dir` matching `pattern` into `dst_dir`.
///
/// Returns the number of files copied. Zero matches is an error, matching
/// `cp dir/*.deb dst/` when the glob does not expand.
pub fn copy_matching(src_dir: &Path, pattern: &str, dst_dir: &Path) -> Result<usize> {
    let matches = glob_in(src_dir, pattern)?;
    if matches.is_empty() {
        anyhow::bail!("No files matching {} in {}", pattern, src_dir.display());
    }
    ensure_dir(dst_dir)?;
    for path in &matches {
        let Some(name) = path.file_name() else {
            continue;
        };
        copy_file(path, &dst_dir.join(name))?;
    }
    Ok(matches.len())
}

/// Atomically move a file by renaming, with fallback to copy+delete.
pub fn atomic_move(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Different filesystem.
            fs::copy(src, dst)
                .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
            fs::remove_file(src)
                .with_context(|| format!("Failed to remove {}", src.display()))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_dir_recursive_keeps_symlinks() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");

        fs::create_dir_all(src.join("subdir")).unwrap();
        fs::write(src.join("isolinux.bin"), "boot").unwrap();
        fs::write(src.join("subdir/ldlinux.c32"), "module").unwrap();
        std::os::unix::fs::symlink("isolinux.bin", src.join("link")).unwrap();

        copy_dir_recursive(&src, &dst).unwrap();

        assert!(dst.join("isolinux.bin").exists());
        assert!(dst.join("subdir/ldlinux.c32").exists());
        assert!(dst.join("link").is_symlink());
        assert_eq!(
            fs::read_link(dst.join("link")).unwrap().to_str().unwrap(),
            "isolinux.bin"
        );
    }

    #[test]
    fn remove_tree_tolerates_missing_paths() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("rootfs");
        fs::create_dir_all(dir.join("usr/share/doc")).unwrap();
        fs::write(dir.join("usr/share/doc/README"), "x").unwrap();

        remove_tree(&dir).unwrap();
        assert!(!dir.exists());
        remove_tree(&dir).unwrap();

        let file = temp.path().join("motd");
        fs::write(&file, "hi").unwrap();
        remove_tree(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn retries_succeed_on_removable_tree() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("staging-iso");
        fs::create_dir_all(dir.join("live")).unwrap();
        assert!(remove_tree_with_retries(&dir, 3, Duration::from_millis(1)));
        assert!(!dir.exists());
    }

    #[test]
    fn write_file_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("etc/default/grub.d/distributor.cfg");
        write_file(&path, "GRUB_DISTRIBUTOR=\"LimeOS\"\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "GRUB_DISTRIBUTOR=\"LimeOS\"\n");
    }

    #[test]
    fn symlink_force_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("etc/systemd/system/default.target");
        write_file(&link, "regular file").unwrap();
        symlink_force(Path::new("/lib/systemd/system/multi-user.target"), &link).unwrap();
        assert_eq!(
            fs::read_link(&link).unwrap(),
            PathBuf::from("/lib/systemd/system/multi-user.target")
        );
        symlink_force(Path::new("/dev/null"), &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/dev/null"));
    }

    #[test]
    fn glob_helpers() {
        let temp = TempDir::new().unwrap();
        let boot = temp.path().join("boot [x]");
        fs::create_dir_all(&boot).unwrap();
        fs::write(boot.join("vmlinuz-6.1.0-17-amd64"), "a").unwrap();
        fs::write(boot.join("vmlinuz-6.1.0-18-amd64"), "b").unwrap();
        fs::write(boot.join("config-6.1.0-18-amd64"), "c").unwrap();

        let all = glob_in(&boot, "vmlinuz-*").unwrap();
        assert_eq!(all.len(), 2);
        let newest = glob_newest(&boot, "vmlinuz-*").unwrap().unwrap();
        assert!(newest.ends_with("vmlinuz-6.1.0-18-amd64"));
        assert!(glob_newest(&boot, "initrd.img-*").unwrap().is_none());
    }

    #[test]
    fn glob_newest_compares_numerically() {
        let temp = TempDir::new().unwrap();
        for name in [
            "vmlinuz-6.1.0-9-amd64",
            "vmlinuz-6.1.0-10-amd64",
            "vmlinuz-5.10.0-28-amd64",
        ] {
            fs::write(temp.path().join(name), "k").unwrap();
        }
        let newest = glob_newest(temp.path(), "vmlinuz-*").unwrap().unwrap();
        assert!(newest.ends_with("vmlinuz-6.1.0-10-amd64"));
    }

    #[test]
    fn copy_matching_copies_only_matches() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("grub-pc_2.06_amd64.deb"), "deb").unwrap();
        fs::write(src.join("grub-pc-bin_2.06_amd64.deb"), "deb").unwrap();
        fs::write(src.join("lock"), "").unwrap();

        assert_eq!(copy_matching(&src, "*.deb", &dst).unwrap(), 2);
        assert!(dst.join("grub-pc_2.06_amd64.deb").exists());
        assert!(!dst.join("lock").exists());

        let empty = temp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        assert!(copy_matching(&empty, "*.deb", &dst).is_err());
    }

    #[test]
    fn make_executable_sets_mode() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("limeos-installation-wizard");
        fs::write(&bin, "#!/bin/sh\n").unwrap();
        make_executable(&bin).unwrap();
        let mode = fs::metadata(&bin).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn atomic_move_moves_file() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("download.part");
        let dst = temp.path().join("installation-wizard");

        fs::write(&src, "content").unwrap();
        atomic_move(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "content");
    }
}
