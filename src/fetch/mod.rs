//! Component binaries from the release host.

pub mod checksum;
pub mod github;

use std::path::Path;

use crate::error::FetchError;
use crate::version::ReleaseSource;

pub use github::GithubClient;

/// A release host that can also serve release assets.
pub trait ReleaseHost: ReleaseSource {
    /// Stream an asset into `dest`, returning the number of bytes written.
    fn download_asset(&self, repo: &str, tag: &str, asset: &str, dest: &Path) -> Result<u64, FetchError>;

    /// Fetch a small text asset. `Ok(None)` when the release has no such asset.
    fn fetch_text_asset(&self, repo: &str, tag: &str, asset: &str) -> Result<Option<String>, FetchError>;
}
