//! Carrier phase: the live image that boots from the ISO and runs the
//! installation wizard.
//!
//! The carrier holds everything the installer needs offline: the target
//! tarball, the component binaries and both bootloader package bundles.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::artifact::filesystem::{
    copy_file, ensure_dir, glob_newest, make_executable, remove_tree, symlink_force, write_file,
};
use crate::cache::{BootMode, CacheOutcome, PackageBundleCache, SaveOutcome};
use crate::config::{
    ComponentSpec, CARRIER_PACKAGES, COMPONENTS, INSTALLER_SERVICE_NAME, INSTALL_BIN_PATH,
    OS_NAME, PACKAGES_DIR, PAYLOAD_ROOTFS_PATH,
};
use crate::phases::brand::brand_identity;
use crate::phases::strip::prune_firmware;
use crate::phases::{clean_apt, derive_rootfs, install_packages, BuildContext};
use crate::process::CommandSpec;

pub fn run(ctx: &BuildContext) -> Result<()> {
    let carrier = &ctx.layout.carrier;
    info!("Creating carrier rootfs at {}", carrier.display());

    derive_rootfs(ctx, carrier)?;
    info!("Installing carrier environment packages...");
    install_packages(ctx, carrier, CARRIER_PACKAGES)
        .context("Failed to install carrier packages")?;
    ctx.exec
        .run(&CommandSpec::chroot(carrier, ["apt-get", "clean"]))?;
    copy_boot_images(carrier)?;

    brand_identity(carrier, ctx.config.clean_version())?;
    prune_firmware(carrier);

    embed_payload(&ctx.layout.rootfs_tarball, carrier)?;
    install_components(&ctx.layout.components, carrier)?;
    configure_init(carrier).context("Failed to configure init")?;
    bundle_packages(ctx, carrier)?;
    clean_apt(ctx, carrier).context("Failed to clean apt state in carrier rootfs")?;

    info!("Phase 4 complete: Carrier rootfs created");
    Ok(())
}

/// Copy the newest versioned kernel and initrd to the fixed paths the
/// bootloader configs point at.
pub fn copy_boot_images(rootfs: &Path) -> Result<()> {
    let boot = rootfs.join("boot");
    for (pattern, fixed) in [("vmlinuz-*", "vmlinuz"), ("initrd.img-*", "initrd.img")] {
        let Some(found) = glob_newest(&boot, pattern)? else {
            bail!("No {} found in {}", pattern, boot.display());
        };
        copy_file(&found, &boot.join(fixed))?;
    }
    Ok(())
}

fn embed_payload(tarball: &Path, rootfs: &Path) -> Result<()> {
    info!("Embedding target rootfs...");
    if !tarball.is_file() {
        bail!("Target rootfs tarball not found: {}", tarball.display());
    }
    copy_file(tarball, &rootfs.join(PAYLOAD_ROOTFS_PATH)).context("Failed to embed target rootfs")
}

/// Install fetched component binaries into `/usr/local/bin`. A missing
/// required component is an error; a missing optional one is skipped.
pub fn install_components(components_dir: &Path, rootfs: &Path) -> Result<()> {
    let bin_dir = rootfs.join(INSTALL_BIN_PATH);
    ensure_dir(&bin_dir)?;

    for spec in COMPONENTS {
        match install_component(components_dir, &bin_dir, spec) {
            Ok(true) => info!("Installed {}", spec.binary_name),
            Ok(false) if spec.required => {
                bail!("Required component {} was not fetched", spec.repo)
            }
            Ok(false) => info!("Optional component {} not present, skipping", spec.repo),
            Err(e) if spec.required => return Err(e),
            Err(e) => warn!("Skipping optional component {}: {:#}", spec.repo, e),
        }
    }
    Ok(())
}

fn install_component(components_dir: &Path, bin_dir: &Path, spec: &ComponentSpec) -> Result<bool> {
    let src = components_dir.join(spec.repo);
    if !src.is_file() {
        return Ok(false);
    }
    let dest = bin_dir.join(spec.binary_name);
    copy_file(&src, &dest)?;
    make_executable(&dest)?;
    Ok(true)
}

pub fn installer_unit() -> String {
    format!(
        "[Unit]\n\
         Description={os} Installation Wizard\n\
         After=systemd-user-sessions.service\n\
         After=plymouth-quit-wait.service\n\
         \n\
         [Service]\n\
         Type=simple\n\
         Environment=PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n\
         ExecStart=/{bin}/{name}\n\
         StandardInput=tty\n\
         StandardOutput=tty\n\
         TTYPath=/dev/tty1\n\
         TTYReset=yes\n\
         TTYVHangup=yes\n\
         Restart=on-failure\n\
         RestartSec=1\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        os = OS_NAME,
        bin = INSTALL_BIN_PATH,
        name = INSTALLER_SERVICE_NAME,
    )
}

/// Boot straight into the installer on tty1: no login prompt, no shell.
pub fn configure_init(rootfs: &Path) -> Result<()> {
    info!("Configuring carrier init system...");
    let system = rootfs.join("etc/systemd/system");
    let unit = format!("{}.service", INSTALLER_SERVICE_NAME);

    write_file(&system.join(&unit), installer_unit())?;
    symlink_force(
        Path::new(&format!("../{}", unit)),
        &system.join("multi-user.target.wants").join(&unit),
    )
    .context("Failed to enable installer service")?;
    symlink_force(
        Path::new("/lib/systemd/system/multi-user.target"),
        &system.join("default.target"),
    )
    .context("Failed to set default target")?;
    remove_tree(&system.join("getty.target.wants/getty@tty1.service"))
        .context("Failed to disable getty on tty1")?;
    Ok(())
}

/// Put the BIOS and EFI bootloader packages into the carrier as `.deb`
/// files. The two sets conflict, so the installer installs whichever one
/// the target machine needs.
fn bundle_packages(ctx: &BuildContext, rootfs: &Path) -> Result<()> {
    let cache = ctx.cache_root.as_deref().map(PackageBundleCache::new);

    for mode in BootMode::ALL {
        let in_root = format!("/{}/{}", PACKAGES_DIR, mode.name());
        let dest = rootfs.join(PACKAGES_DIR).join(mode.name());
        ensure_dir(&dest)?;

        if let Some(cache) = &cache {
            match cache.try_restore(mode, &dest) {
                CacheOutcome::Hit => continue,
                CacheOutcome::Miss => {}
                CacheOutcome::Fallback(reason) => {
                    warn!("Downloading {} packages fresh ({})", mode, reason)
                }
            }
        }

        info!("Downloading {} packages...", mode);
        ctx.exec
            .run(
                &CommandSpec::chroot_in(rootfs, &in_root, ["apt-get", "download"])
                    .args(mode.packages()),
            )
            .with_context(|| format!("Failed to download {} packages", mode))?;

        if let Some(cache) = &cache {
            if let SaveOutcome::Skipped(reason) = cache.save(mode, &dest) {
                debug!("{} packages will be downloaded again next build: {}", mode, reason);
            }
        }
    }
    Ok(())
}
