//! Size reduction shared by both derived images.
//!
//! [`strip_base`] runs once on the freshly bootstrapped base, so anything it
//! writes (dpkg path excludes, module blacklist, masks) is inherited by the
//! target and the carrier. [`prune_firmware`] runs again on each derived
//! image since `linux-image-*` can pull firmware back in.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::artifact::filesystem::{remove_tree, symlink_force, write_file};
use crate::config::{BLUETOOTH_MODULES, FIRMWARE_MODULES, INTEL_SOF_MODULES};

const FIRMWARE_ROOTS: [&str; 2] = ["/usr/lib/firmware", "/lib/firmware"];

/// Globs excluded in addition to the per-directory firmware table, grouped
/// under a comment header each.
const EXTRA_FIRMWARE_EXCLUDES: &[(&str, &[&str])] = &[
    ("Intel Bluetooth firmware.", &["intel/*bt*"]),
    ("Intel Sound Open Firmware.", &["intel/sof/*", "intel/sof-tplg/*"]),
    ("Broadcom Bluetooth firmware.", &["brcm/*.hcd"]),
    ("Broadcom WiFi firmware.", &["brcm/*-pcie.*", "brcm/*-sdio.*"]),
];

const MASKED_UNITS: &[&str] = &["systemd-rfkill.service", "systemd-rfkill.socket"];

pub fn strip_base(rootfs: &Path) -> Result<()> {
    info!("Stripping base rootfs at {}", rootfs.display());

    for dir in ["usr/share/doc", "usr/share/man", "usr/share/info"] {
        remove_tree(&rootfs.join(dir))?;
    }
    remove_foreign_locales(rootfs).context("Failed to remove non-English locales")?;

    if let Err(e) = write_firmware_exclusions(rootfs) {
        warn!("Failed to configure firmware exclusions (continuing anyway): {:#}", e);
    }
    mask_units(rootfs);

    write_file(&rootfs.join("etc/motd"), "").context("Failed to clear /etc/motd")?;
    if let Err(e) = remove_tree(&rootfs.join("etc/update-motd.d")) {
        warn!("{:#}", e);
    }

    info!("Base rootfs stripped successfully");
    Ok(())
}

/// Remove every `usr/share/locale` entry not starting with `en`.
fn remove_foreign_locales(rootfs: &Path) -> Result<()> {
    let locale_dir = rootfs.join("usr/share/locale");
    if !locale_dir.is_dir() {
        return Ok(());
    }

    for entry in WalkDir::new(&locale_dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("en") {
            continue;
        }
        remove_tree(entry.path())?;
    }
    Ok(())
}

fn write_firmware_exclusions(rootfs: &Path) -> Result<()> {
    write_file(
        &rootfs.join("etc/dpkg/dpkg.cfg.d/exclude-firmware"),
        dpkg_firmware_excludes(),
    )
    .context("Failed to write dpkg firmware exclusions")?;
    write_file(
        &rootfs.join("etc/modprobe.d/blacklist-excluded-firmware.conf"),
        module_blacklist(),
    )
    .context("Failed to write module blacklist")
}

/// Contents of `/etc/dpkg/dpkg.cfg.d/exclude-firmware`.
pub fn dpkg_firmware_excludes() -> String {
    let mut out = String::from(
        "# Exclude noncritical firmware from package installation.\n\
         # This prevents firmware from being installed in the first place,\n\
         # rather than removing it after installation.\n\n",
    );
    for (dir, _) in FIRMWARE_MODULES {
        for root in FIRMWARE_ROOTS {
            out.push_str(&format!("path-exclude={}/{}/*\n", root, dir));
        }
    }
    for (title, globs) in EXTRA_FIRMWARE_EXCLUDES {
        out.push_str(&format!("\n# {}\n", title));
        for root in FIRMWARE_ROOTS {
            for glob in *globs {
                out.push_str(&format!("path-exclude={}/{}\n", root, glob));
            }
        }
    }
    out
}

/// Contents of `/etc/modprobe.d/blacklist-excluded-firmware.conf`.
pub fn module_blacklist() -> String {
    let mut out = String::from(
        "# Modules blacklisted because their firmware is excluded.\n\
         # See /etc/dpkg/dpkg.cfg.d/exclude-firmware for exclusions.\n\n",
    );
    for (_, modules) in FIRMWARE_MODULES {
        for module in *modules {
            out.push_str(&format!("blacklist {}\n", module));
        }
    }
    out.push_str("\n# Bluetooth modules (firmware excluded from multiple sources).\n");
    for module in BLUETOOTH_MODULES {
        out.push_str(&format!("blacklist {}\n", module));
    }
    out.push_str("\n# Intel Sound Open Firmware modules.\n");
    for module in INTEL_SOF_MODULES {
        out.push_str(&format!("blacklist {}\n", module));
    }
    out
}

fn mask_units(rootfs: &Path) {
    let unit_dir = rootfs.join("etc/systemd/system");
    for unit in MASKED_UNITS {
        if let Err(e) = symlink_force(Path::new("/dev/null"), &unit_dir.join(unit)) {
            warn!("Failed to mask {}: {:#}", unit, e);
        }
    }
}

/// Delete excluded firmware directories that packages installed anyway.
/// Best effort.
pub fn prune_firmware(rootfs: &Path) {
    let firmware = rootfs.join("usr/lib/firmware");
    for (dir, _) in FIRMWARE_MODULES {
        if let Err(e) = remove_tree(&firmware.join(dir)) {
            warn!("{:#}", e);
        }
    }
}
