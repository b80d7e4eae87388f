//! OS identity and boot branding written into a rootfs.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::artifact::filesystem::write_file;
use crate::config::{OS_BASE_ID, OS_HOME_URL, OS_ID, OS_NAME};

/// Kernel command line for the installed system's silent boot.
const INSTALLED_CMDLINE: &str = "quiet splash loglevel=0 vt.global_cursor_default=0";

pub fn os_release(version: &str) -> String {
    format!(
        "PRETTY_NAME=\"{name} {version}\"\n\
         NAME=\"{name}\"\n\
         VERSION_ID=\"{version}\"\n\
         VERSION=\"{version}\"\n\
         ID={id}\n\
         ID_LIKE={base}\n\
         HOME_URL=\"{url}\"\n",
        name = OS_NAME,
        version = version,
        id = OS_ID,
        base = OS_BASE_ID,
        url = OS_HOME_URL,
    )
}

/// Write `/etc/os-release`, `/etc/issue` and `/etc/issue.net`.
///
/// `version` is expected without its `v` prefix.
pub fn brand_identity(rootfs: &Path, version: &str) -> Result<()> {
    info!("Applying OS identity branding...");
    let etc = rootfs.join("etc");

    write_file(&etc.join("os-release"), os_release(version))
        .context("Failed to write /etc/os-release")?;
    write_file(&etc.join("issue"), format!("{} {} \\n \\l\n\n", OS_NAME, version))
        .context("Failed to write /etc/issue")?;
    write_file(&etc.join("issue.net"), format!("{} {}\n", OS_NAME, version))
        .context("Failed to write /etc/issue.net")?;

    Ok(())
}

/// GRUB defaults for the installed system, as a drop-in so the
/// package-managed `/etc/default/grub` stays untouched.
pub fn brand_grub(rootfs: &Path) -> Result<()> {
    info!("Configuring GRUB for silent boot...");
    let content = format!(
        "GRUB_DISTRIBUTOR=\"{}\"\n\
         GRUB_TIMEOUT=0\n\
         GRUB_TIMEOUT_STYLE=hidden\n\
         GRUB_RECORDFAIL_TIMEOUT=0\n\
         GRUB_GFXMODE=auto\n\
         GRUB_GFXPAYLOAD_LINUX=keep\n\
         GRUB_CMDLINE_LINUX_DEFAULT=\"{}\"\n",
        OS_NAME, INSTALLED_CMDLINE
    );
    write_file(&rootfs.join("etc/default/grub.d/distributor.cfg"), content)
        .context("Failed to write GRUB distributor config")
}
