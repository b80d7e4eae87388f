//! Squashfs image builder.
//!
//! Wraps `mksquashfs` for the live filesystem of the carrier image.

use anyhow::{Context, Result};
use std::path::Path;

use crate::process::{CommandExecutor, CommandSpec};

/// Options for building a squashfs image.
#[derive(Debug, Clone)]
pub struct SquashfsOptions<'a> {
    /// Compression algorithm passed to `-comp`.
    ///
    /// Default: "xz" (smallest image; live-boot kernels all support it)
    pub compression: &'a str,

    /// Overwrite an existing image instead of appending to it.
    pub noappend: bool,
}

impl Default for SquashfsOptions<'_> {
    fn default() -> Self {
        Self {
            compression: "xz",
            noappend: true,
        }
    }
}

/// Build a squashfs image from a directory.
pub fn build_squashfs(
    exec: &dyn CommandExecutor,
    source_dir: &Path,
    output: &Path,
    options: &SquashfsOptions,
) -> Result<()> {
    let mut cmd = CommandSpec::new("mksquashfs")
        .arg_path(source_dir)
        .arg_path(output)
        .args(["-comp", options.compression]);
    if options.noappend {
        cmd = cmd.arg("-noappend");
    }

    exec.run(&cmd)
        .with_context(|| format!("Failed to create squashfs from {}", source_dir.display()))
}
