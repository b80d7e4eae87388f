//! Target phase: the system the installer writes to disk, shipped as
//! `rootfs.tar.gz`.

use anyhow::{Context, Result};
use tracing::info;

use crate::artifact::filesystem::remove_tree;
use crate::artifact::tarball::pack_dir;
use crate::config::TARGET_PACKAGES;
use crate::phases::brand::{brand_grub, brand_identity};
use crate::phases::strip::prune_firmware;
use crate::phases::{clean_apt, derive_rootfs, install_packages, BuildContext};

pub fn run(ctx: &BuildContext) -> Result<()> {
    let target = &ctx.layout.target;
    info!("Creating target rootfs at {}", target.display());

    derive_rootfs(ctx, target)?;

    info!("Installing target packages...");
    install_packages(ctx, target, TARGET_PACKAGES).context("Failed to install target packages")?;

    brand_identity(target, ctx.config.clean_version())?;
    brand_grub(target)?;
    prune_firmware(target);
    clean_apt(ctx, target).context("Failed to clean apt state in target rootfs")?;

    info!("Packaging target rootfs...");
    pack_dir(ctx.exec, target, &ctx.layout.rootfs_tarball)
        .context("Failed to package target rootfs")?;
    remove_tree(target)?;

    info!("Phase 3 complete: {}", ctx.layout.rootfs_tarball.display());
    Ok(())
}
