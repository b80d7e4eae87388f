//! Build pipeline for the LimeOS installer ISO.
//!
//! A build runs five stages in order against a scratch build directory:
//!
//! ```text
//! Preparation  resolve + fetch component binaries (GitHub releases)
//!      │
//! Base         debootstrap a minimal Debian tree (or restore it from cache)
//!      │
//! Target       base + target packages ──► rootfs.tar.gz
//!      │
//! Carrier      base + live packages + rootfs.tar.gz + components
//!      │
//! Assembly     GRUB / isolinux / Plymouth ──► limeos-<version>.iso
//! ```
//!
//! - [`pipeline`] - stage plan and the sequential runner
//! - [`phases`] - what each stage does
//! - [`cache`] - rootfs tarball, package bundle and apt bind-mount caches
//! - [`version`] and [`fetch`] - release tag resolution and downloads
//! - [`interrupt`] - cooperative SIGINT/SIGTERM handling
//! - [`artifact`] - filesystem, tarball, squashfs and ISO primitives
//! - [`preflight`] - host tool validation before builds
//!
//! Every external tool runs through [`process::CommandExecutor`], so the
//! stages can be tested without root.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod interrupt;
pub mod manifest;
pub mod phases;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod version;

pub use config::{BuildConfig, BuildSettings};
pub use error::BuildError;
pub use phases::{BuildContext, Phases};
pub use pipeline::{PhaseRunner, Stage};
