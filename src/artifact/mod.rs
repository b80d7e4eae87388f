//! Artifact builders for the installer image.
//!
//! - [`filesystem`] - Path-aware fs helpers used by every phase
//! - [`tarball`] - Rootfs tarballs (system `tar`) and in-process verification
//! - [`squashfs`] - The live filesystem (mksquashfs)
//! - [`iso`] - EFI system image and the hybrid ISO (xorriso)

pub mod filesystem;
pub mod iso;
pub mod squashfs;
pub mod tarball;
