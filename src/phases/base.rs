//! Base phase: the minimal Debian tree both derived images start from.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::artifact::filesystem::remove_tree;
use crate::cache::{CacheKey, CacheOutcome, RootfsCache, SaveOutcome};
use crate::phases::strip::strip_base;
use crate::phases::BuildContext;
use crate::process::CommandSpec;

pub fn run(ctx: &BuildContext) -> Result<()> {
    let base = &ctx.layout.base;
    let cache = ctx
        .cache_root
        .as_ref()
        .map(|root| RootfsCache::new(root, CacheKey::for_config(ctx.config)));

    if let Some(cache) = &cache {
        match cache.try_restore(ctx.exec, base) {
            CacheOutcome::Hit => {
                info!("Phase 2 complete: Base rootfs ready (from cache)");
                return Ok(());
            }
            CacheOutcome::Miss => info!("No cached base rootfs for key {}", cache.key()),
            CacheOutcome::Fallback(reason) => {
                warn!("Cache restore failed ({}), rebuilding from scratch", reason)
            }
        }
    }

    create(ctx).context("Failed to create base rootfs")?;
    strip_base(base).context("Failed to strip base rootfs")?;

    if let Some(cache) = &cache {
        if let SaveOutcome::Skipped(reason) = cache.save(ctx.exec, base) {
            debug!("Next build will bootstrap again: {}", reason);
        }
    }

    info!("Phase 2 complete: Base rootfs ready");
    Ok(())
}

/// `debootstrap --variant=minbase <dist> <dir>` followed by `apt-get update`
/// so later installs have package lists.
fn create(ctx: &BuildContext) -> Result<()> {
    let base = &ctx.layout.base;
    info!("Creating base rootfs at {}", base.display());
    remove_tree(base)?;

    ctx.exec.run(
        &CommandSpec::new("debootstrap")
            .arg("--variant=minbase")
            .arg(&ctx.config.distribution)
            .arg_path(base),
    )?;

    info!("Updating package lists...");
    ctx.exec
        .run(&CommandSpec::chroot(base, ["apt-get", "update"]))
        .context("Failed to update package lists")
}
