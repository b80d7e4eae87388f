//! Gzip-compressed rootfs tarballs.
//!
//! Packing and unpacking go through the system `tar` so ownership, device
//! nodes and xattrs of a chroot survive. Verification is done in-process.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;

use crate::artifact::filesystem::ensure_dir;
use crate::process::{CommandExecutor, CommandSpec};

/// `tar --numeric-owner -czf <output> -C <src_dir> .`
pub fn pack_dir(exec: &dyn CommandExecutor, src_dir: &Path, output: &Path) -> Result<()> {
    if !src_dir.is_dir() {
        bail!("Source directory not found: {}", src_dir.display());
    }
    if let Some(parent) = output.parent() {
        ensure_dir(parent)?;
    }
    exec.run(
        &CommandSpec::new("tar")
            .args(["--numeric-owner", "-czf"])
            .arg_path(output)
            .arg("-C")
            .arg_path(src_dir)
            .arg("."),
    )
    .with_context(|| format!("Failed to pack {}", src_dir.display()))
}

/// Extract `archive` into `dest`, creating it first.
pub fn unpack(exec: &dyn CommandExecutor, archive: &Path, dest: &Path) -> Result<()> {
    ensure_dir(dest)?;
    exec.run(
        &CommandSpec::new("tar")
            .args(["--numeric-owner", "-xzf"])
            .arg_path(archive)
            .arg("-C")
            .arg_path(dest),
    )
    .with_context(|| format!("Failed to extract {}", archive.display()))
}

/// Walk every entry of a `.tar.gz` and drain the gzip stream so both the
/// tar headers and the gzip trailer are checked. Returns the entry count.
pub fn verify_tar_gz(path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut count = 0u64;
    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read {}", path.display()))?
    {
        let mut entry = entry.with_context(|| format!("Corrupt entry in {}", path.display()))?;
        io::copy(&mut entry, &mut io::sink())
            .with_context(|| format!("Corrupt data in {}", path.display()))?;
        count += 1;
    }

    let mut decoder = archive.into_inner();
    io::copy(&mut decoder, &mut io::sink())
        .with_context(|| format!("Truncated gzip stream in {}", path.display()))?;

    if count == 0 {
        bail!("Archive has no entries: {}", path.display());
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingExecutor;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use tempfile::TempDir;

    fn write_sample(path: &Path) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let data = b"ID=limeos\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "etc/os-release", &data[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn verifies_intact_archive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("base-rootfs.tar.gz");
        write_sample(&path);
        assert_eq!(verify_tar_gz(&path).unwrap(), 1);
    }

    #[test]
    fn rejects_truncated_archive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("base-rootfs.tar.gz");
        write_sample(&path);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(verify_tar_gz(&path).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("base-rootfs.tar.gz");
        fs::write(&path, b"definitely not gzip").unwrap();
        assert!(verify_tar_gz(&path).is_err());
    }

    #[test]
    fn pack_uses_numeric_owner_and_dot() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("target");
        fs::create_dir_all(&src).unwrap();
        let out = temp.path().join("out/rootfs.tar.gz");

        let exec = RecordingExecutor::new();
        pack_dir(&exec, &src, &out).unwrap();

        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        let args = calls[0].get_args();
        assert_eq!(args[0], "--numeric-owner");
        assert_eq!(args[1], "-czf");
        assert_eq!(args.last().map(String::as_str), Some("."));
        assert!(temp.path().join("out").is_dir());
    }

    #[test]
    fn pack_rejects_missing_source() {
        let temp = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        assert!(pack_dir(&exec, &temp.path().join("nope"), &temp.path().join("x.tar.gz")).is_err());
        assert!(exec.calls().is_empty());
    }
}
