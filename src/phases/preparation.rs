//! Preparation: put every component binary under `<build>/components/<repo>`.
//!
//! A binary in the local bin directory wins unless it cannot be copied;
//! otherwise the release tag is
//! resolved and the asset downloaded, then checked against the release's
//! `SHA256SUMS` when one is published. Required components must succeed;
//! optional ones are skipped with a warning.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::filesystem::{atomic_move, copy_file, ensure_dir, remove_tree};
use crate::config::{optional_components, required_components, ComponentSpec, CHECKSUMS_FILENAME};
use crate::error::FetchError;
use crate::fetch::checksum::{find_checksum, verify_file};
use crate::fetch::ReleaseHost;
use crate::phases::BuildContext;
use crate::version::resolve_or_fallback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentSource {
    Local,
    Remote,
}

/// A component placed in the components directory, as recorded in the
/// build manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedComponent {
    pub repo: String,
    pub requested: String,
    /// Release tag downloaded. `None` for local binaries.
    pub tag: Option<String>,
    pub source: ComponentSource,
}

pub fn run(ctx: &BuildContext) -> Result<Vec<ResolvedComponent>> {
    info!("Fetching components...");
    let dir = &ctx.layout.components;
    ensure_dir(dir)?;

    let mut fetched = Vec::new();
    for spec in required_components() {
        let component = fetch_component(ctx, spec, dir)
            .with_context(|| format!("Failed to fetch required component {}", spec.repo))?;
        fetched.push(component);
    }
    for spec in optional_components() {
        match fetch_component(ctx, spec, dir) {
            Ok(component) => fetched.push(component),
            Err(e) => warn!("Skipping optional component {}: {:#}", spec.repo, e),
        }
    }

    info!("Phase 1 complete: {} component(s) ready", fetched.len());
    Ok(fetched)
}

fn fetch_component(ctx: &BuildContext, spec: &ComponentSpec, dir: &Path) -> Result<ResolvedComponent> {
    let dest = dir.join(spec.repo);
    let requested = ctx.config.version.clone();

    let local = ctx.settings.paths.local_bin_dir.join(spec.binary_name);
    if local.exists() {
        match copy_local(&local, &dest) {
            Ok(()) => {
                info!("Using local {}", spec.binary_name);
                return Ok(ResolvedComponent {
                    repo: spec.repo.to_string(),
                    requested,
                    tag: None,
                    source: ComponentSource::Local,
                });
            }
            Err(e) => warn!("{:#}, downloading {} instead", e, spec.repo),
        }
    }

    let resolved = resolve_or_fallback(ctx.host, spec.repo, &requested).map_err(FetchError::from)?;
    info!("Fetching {} {}", spec.repo, resolved.tag);
    download_component(ctx.host, spec.repo, &resolved.tag, &dest)?;

    Ok(ResolvedComponent {
        repo: spec.repo.to_string(),
        requested,
        tag: Some(resolved.tag),
        source: ComponentSource::Remote,
    })
}

/// Copy a local build into place, leaving nothing at `dest` on failure.
fn copy_local(local: &Path, dest: &Path) -> Result<()> {
    let result = remove_tree(dest).and_then(|()| copy_file(local, dest));
    if result.is_err() {
        if let Err(e) = remove_tree(dest) {
            warn!("{:#}", e);
        }
    }
    result
}

/// Download the `<repo>` asset of release `tag` to `dest`.
///
/// The body lands in a `.part` file next to `dest` and is moved into place
/// only after it is non-empty and its checksum (if published) matches.
pub fn download_component(host: &dyn ReleaseHost, repo: &str, tag: &str, dest: &Path) -> Result<()> {
    let partial = dest.with_file_name(format!(".{}.part", repo));

    let result = download_and_verify(host, repo, tag, &partial)
        .and_then(|()| atomic_move(&partial, dest));
    if result.is_err() {
        if let Err(e) = remove_tree(&partial) {
            warn!("{:#}", e);
        }
    }
    result
}

fn download_and_verify(host: &dyn ReleaseHost, repo: &str, tag: &str, partial: &Path) -> Result<()> {
    let bytes = host.download_asset(repo, tag, repo, partial)?;
    if bytes == 0 {
        return Err(FetchError::EmptyDownload(format!("{repo} {tag}")).into());
    }
    verify_checksum(host, repo, tag, partial)?;
    Ok(())
}

fn verify_checksum(host: &dyn ReleaseHost, repo: &str, tag: &str, path: &Path) -> Result<(), FetchError> {
    let manifest = match host.fetch_text_asset(repo, tag, CHECKSUMS_FILENAME) {
        Ok(Some(manifest)) => manifest,
        Ok(None) => {
            warn!("No checksum available for {} - skipping verification", repo);
            return Ok(());
        }
        Err(e) => {
            warn!("Could not fetch {} for {} ({}) - skipping verification", CHECKSUMS_FILENAME, repo, e);
            return Ok(());
        }
    };

    let Some(expected) = find_checksum(&manifest, repo) else {
        warn!("No checksum entry for {} in {} - skipping verification", repo, CHECKSUMS_FILENAME);
        return Ok(());
    };

    verify_file(path, repo, &expected)?;
    info!("Checksum verified for {}", repo);
    Ok(())
}
