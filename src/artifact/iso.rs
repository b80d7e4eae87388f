//! Hybrid BIOS/UEFI ISO image builder.
//!
//! The staging directory is expected to contain `isolinux/` (BIOS boot via
//! El Torito no-emulation) and `boot/grub/efiboot.img` (UEFI alternate boot
//! entry). `-isohybrid-mbr` and `-isohybrid-gpt-basdat` make the result
//! bootable from USB sticks as well.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::artifact::filesystem::{copy_file, ensure_dir};
use crate::process::{CommandExecutor, CommandSpec};

/// Size of the FAT12 EFI system image.
pub const EFIBOOT_SIZE_MB: u32 = 4;

/// Modules baked into a GRUB EFI image when no prebuilt one is available.
pub const GRUB_EFI_MODULES: &[&str] = &[
    "normal", "boot", "linux", "part_gpt", "part_msdos", "fat", "iso9660",
];

/// Paths of the boot records, relative to the staging directory.
#[derive(Debug, Clone)]
pub struct IsoOptions<'a> {
    /// MBR template from the host's isolinux package (`isohdpfx.bin`).
    pub mbr_template: &'a Path,
    pub boot_catalog: &'a str,
    pub bios_boot_image: &'a str,
    pub efi_boot_image: &'a str,
}

impl<'a> IsoOptions<'a> {
    pub fn hybrid(mbr_template: &'a Path) -> Self {
        Self {
            mbr_template,
            boot_catalog: "isolinux/boot.cat",
            bios_boot_image: "isolinux/isolinux.bin",
            efi_boot_image: "boot/grub/efiboot.img",
        }
    }
}

/// Create the FAT12 EFI system image with `EFI/BOOT/BOOTX64.EFI` inside.
///
/// The image is loop-mounted at `mount_point` while it is populated and is
/// always unmounted again, even when populating fails. `grub_efi` is copied
/// when it exists; otherwise an image is built with `grub-mkimage`.
pub fn create_efi_boot_image(
    exec: &dyn CommandExecutor,
    image: &Path,
    mount_point: &Path,
    grub_efi: &Path,
) -> Result<()> {
    if let Some(parent) = image.parent() {
        ensure_dir(parent)?;
    }

    exec.run(
        &CommandSpec::new("dd")
            .arg("if=/dev/zero")
            .arg(format!("of={}", image.display()))
            .args(["bs=1M", &format!("count={}", EFIBOOT_SIZE_MB)]),
    )
    .context("Failed to create EFI boot image")?;

    exec.run(&CommandSpec::new("mkfs.fat").args(["-F", "12"]).arg_path(image))
        .context("Failed to format EFI boot image")?;

    ensure_dir(mount_point)?;
    exec.run(
        &CommandSpec::new("mount")
            .args(["-o", "loop"])
            .arg_path(image)
            .arg_path(mount_point),
    )
    .context("Failed to mount EFI boot image")?;

    let populated = install_efi_loader(exec, mount_point, grub_efi);
    let unmounted = exec
        .run(&CommandSpec::new("umount").arg_path(mount_point))
        .context("Failed to unmount EFI boot image");

    if let Err(e) = std::fs::remove_dir(mount_point) {
        warn!("Failed to remove {}: {}", mount_point.display(), e);
    }

    populated?;
    unmounted
}

fn install_efi_loader(exec: &dyn CommandExecutor, mount_point: &Path, grub_efi: &Path) -> Result<()> {
    let boot_dir = mount_point.join("EFI/BOOT");
    ensure_dir(&boot_dir)?;
    let dest = boot_dir.join("BOOTX64.EFI");

    if grub_efi.is_file() {
        return copy_file(grub_efi, &dest);
    }

    info!(
        "{} not found, building GRUB EFI image with grub-mkimage",
        grub_efi.display()
    );
    exec.run(
        &CommandSpec::new("grub-mkimage")
            .arg("-o")
            .arg_path(&dest)
            .args(["-p", "/boot/grub", "-O", "x86_64-efi"])
            .args(GRUB_EFI_MODULES),
    )
    .context("Failed to build GRUB EFI image")
}

/// Run `xorriso -as mkisofs` over `staging` and write the hybrid image.
pub fn build_hybrid_iso(
    exec: &dyn CommandExecutor,
    staging: &Path,
    output: &Path,
    options: &IsoOptions,
) -> Result<()> {
    if let Some(parent) = output.parent() {
        ensure_dir(parent)?;
    }

    exec.run(
        &CommandSpec::new("xorriso")
            .args(["-as", "mkisofs", "-o"])
            .arg_path(output)
            .arg("-isohybrid-mbr")
            .arg_path(options.mbr_template)
            .args(["-c", options.boot_catalog])
            .args(["-b", options.bios_boot_image])
            .args(["-no-emul-boot", "-boot-load-size", "4", "-boot-info-table"])
            .arg("-eltorito-alt-boot")
            .args(["-e", options.efi_boot_image])
            .args(["-no-emul-boot", "-isohybrid-gpt-basdat"])
            .arg_path(staging),
    )
    .with_context(|| format!("Failed to create ISO {}", output.display()))
}
