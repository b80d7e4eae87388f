//! On-disk caches under `<cache_root>` (see [`crate::config::cache_root`]).
//!
//! ```text
//! <cache_root>/
//!     base-rootfs-<key>.tar.gz     RootfsCache
//!     .base-rootfs.lock            save lock
//!     packages/bios/*.deb          PackageBundleCache
//!     packages/efi/*.deb           PackageBundleCache
//!     packages/apt/                PackageCacheMount (bind-mounted)
//! ```
//!
//! Every operation here is best-effort. Failures come back as
//! [`CacheOutcome::Fallback`] / [`SaveOutcome::Skipped`] and the caller does
//! the expensive thing instead.

pub mod key;
pub mod mount;
pub mod packages;
pub mod rootfs;

use std::fmt;
use std::path::PathBuf;

pub use key::CacheKey;
pub use mount::PackageCacheMount;
pub use packages::{BootMode, PackageBundleCache};
pub use rootfs::RootfsCache;

/// Result of trying to populate a directory from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// An entry existed but could not be used.
    Fallback(String),
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOutcome::Hit => write!(f, "hit"),
            CacheOutcome::Miss => write!(f, "miss"),
            CacheOutcome::Fallback(reason) => write!(f, "fallback ({})", reason),
        }
    }
}

/// Result of trying to persist an artifact.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    Skipped(String),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved(_))
    }
}
