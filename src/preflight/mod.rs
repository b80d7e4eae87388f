//! Preflight checks for build validation.
//!
//! Validates that the host has the tools and boot files a build needs
//! before any stage runs, so a missing package shows up as one readable
//! list instead of a failure twenty minutes into debootstrap.
//!
//! # Example
//!
//! ```rust,ignore
//! use limeos_iso_builder::preflight::{check_host, command_exists};
//!
//! if !command_exists("mksquashfs") {
//!     println!("squashfs-tools not installed");
//! }
//! check_host(&settings)?;
//! ```

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::debug;

use crate::config::BuildSettings;
use crate::error::BuildError;

/// Required host tools. Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("debootstrap", "debootstrap"),
    ("mksquashfs", "squashfs-tools"),
    ("xorriso", "xorriso"),
    ("mkfs.fat", "dosfstools"),
    ("grub-mkimage", "grub-common"),
    ("tar", "tar"),
    ("chroot", "coreutils"),
    ("mount", "mount"),
    ("umount", "mount"),
    ("cp", "coreutils"),
    ("dd", "coreutils"),
];

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools from `tools` not found in PATH, one report line each.
fn missing_tools(tools: &[(&str, &str)]) -> Vec<String> {
    tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect()
}

/// Host files copied into the image, paired with a label for the report.
pub fn required_files(settings: &BuildSettings) -> Vec<(&'static str, PathBuf)> {
    let host = &settings.host;
    let mut files = vec![
        ("splash logo", settings.paths.splash_logo.clone()),
        ("black background", settings.paths.black_png.clone()),
        ("isolinux.bin", host.isolinux_bin.clone()),
        ("isohdpfx.bin", host.isolinux_mbr.clone()),
    ];
    for (path, name) in host.isolinux_modules() {
        files.push((name, path.to_path_buf()));
    }
    files
}

fn missing_files(files: &[(&str, PathBuf)]) -> Vec<String> {
    files
        .iter()
        .filter(|(_, path)| !path.is_file())
        .map(|(label, path)| format!("  {} ({})", label, path.display()))
        .collect()
}

/// Check tools and files together and report everything missing at once.
pub fn check_host(settings: &BuildSettings) -> Result<()> {
    let mut missing = missing_tools(REQUIRED_TOOLS);
    missing.extend(missing_files(&required_files(settings)));

    if !missing.is_empty() {
        bail!("Missing build dependencies:\n{}", missing.join("\n"));
    }
    debug!("Preflight passed");
    Ok(())
}

/// Building needs root for debootstrap, chroot and mount.
pub fn require_root() -> Result<(), BuildError> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(BuildError::NotRoot);
    }
    Ok(())
}
