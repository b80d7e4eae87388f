//! Assembly phase: bootloader and splash configuration in the carrier, then
//! the hybrid ISO.
//!
//! Staging layout:
//!
//! ```text
//! staging-iso/
//! ├── boot/{vmlinuz,initrd.img}
//! ├── boot/grub/{grub.cfg,efiboot.img}
//! ├── isolinux/{isolinux.bin,*.c32,black.png,isolinux.cfg}
//! └── live/filesystem.squashfs
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::artifact::filesystem::{
    copy_dir_recursive, copy_file, ensure_dir, glob_newest, remove_tree, remove_tree_with_retries,
    write_file,
};
use crate::artifact::iso::{build_hybrid_iso, create_efi_boot_image, IsoOptions};
use crate::artifact::squashfs::{build_squashfs, SquashfsOptions};
use crate::config::{
    HostFiles, BOOT_INITRD_PATH, BOOT_KERNEL_PARAMS, BOOT_KERNEL_PATH, GRUB_MENU_ENTRY_NAME,
    OS_ID, PLYMOUTH_DESCRIPTION, PLYMOUTH_DISPLAY_NAME, PLYMOUTH_THEMES_DIR, PLYMOUTH_THEME_NAME,
};
use crate::phases::BuildContext;
use crate::process::CommandSpec;

const STAGING_CLEANUP_ATTEMPTS: u32 = 3;
const STAGING_CLEANUP_DELAY: Duration = Duration::from_secs(1);

pub fn run(ctx: &BuildContext) -> Result<PathBuf> {
    let carrier = &ctx.layout.carrier;

    setup_grub(carrier).context("Failed to configure GRUB")?;
    setup_isolinux(carrier, &ctx.settings.host, &ctx.settings.paths.black_png)
        .context("Failed to configure isolinux")?;
    setup_splash(ctx, carrier).context("Failed to configure splash screen")?;
    info!("Boot configuration complete");

    let iso = ctx.iso_path();
    let staging = &ctx.layout.staging;
    let built = create_iso(ctx, carrier, staging, &iso);
    remove_tree_with_retries(staging, STAGING_CLEANUP_ATTEMPTS, STAGING_CLEANUP_DELAY);
    built.context("Failed to create ISO image")?;

    info!("Phase 5 complete: ISO created at {}", iso.display());
    Ok(iso)
}

pub fn grub_cfg() -> String {
    format!(
        "set gfxmode=auto\n\
         set gfxpayload=keep\n\
         set default=0\n\
         set timeout_style=hidden\n\
         set timeout=0\n\
         \n\
         menuentry \"{}\" {{\n\
         \x20   linux {} {}\n\
         \x20   initrd {}\n\
         }}\n",
        GRUB_MENU_ENTRY_NAME, BOOT_KERNEL_PATH, BOOT_KERNEL_PARAMS, BOOT_INITRD_PATH
    )
}

/// `boot/grub/grub.cfg` for UEFI boot: hidden menu, single entry.
fn setup_grub(rootfs: &Path) -> Result<()> {
    info!("Configuring GRUB for UEFI boot");
    write_file(&rootfs.join("boot/grub/grub.cfg"), grub_cfg())
}

/// Hidden vesamenu on a black background. `TIMEOUT 1` is the shortest
/// delay; 0 means wait forever.
pub fn isolinux_cfg() -> String {
    let mut cfg = format!(
        "UI vesamenu.c32\n\
         DEFAULT {id}\n\
         PROMPT 0\n\
         TIMEOUT 1\n\
         TOTALTIMEOUT 1\n\
         MENU HIDDEN\n\
         MENU BACKGROUND black.png\n",
        id = OS_ID
    );
    for element in [
        "screen", "border", "title", "unsel", "sel", "hotsel", "hotkey", "timeout_msg", "timeout",
    ] {
        cfg.push_str(&format!("MENU COLOR {} 0 #00000000 #00000000 none\n", element));
    }
    cfg.push_str(&format!(
        "\nLABEL {}\n  KERNEL {}\n  INITRD {}\n  APPEND {}\n",
        OS_ID, BOOT_KERNEL_PATH, BOOT_INITRD_PATH, BOOT_KERNEL_PARAMS
    ));
    cfg
}

fn setup_isolinux(rootfs: &Path, host: &HostFiles, black_png: &Path) -> Result<()> {
    info!("Configuring isolinux for BIOS boot");
    let dir = rootfs.join("isolinux");
    ensure_dir(&dir)?;

    copy_file(&host.isolinux_bin, &dir.join("isolinux.bin"))?;
    for (src, name) in host.isolinux_modules() {
        copy_file(src, &dir.join(name))?;
    }
    copy_file(black_png, &dir.join("black.png"))?;
    write_file(&dir.join("isolinux.cfg"), isolinux_cfg())
}

pub fn plymouth_theme() -> String {
    let dir = format!("/{}/{}", PLYMOUTH_THEMES_DIR, PLYMOUTH_THEME_NAME);
    format!(
        "[Plymouth Theme]\n\
         Name={}\n\
         Description={}\n\
         ModuleName=script\n\
         \n\
         [script]\n\
         ImageDir={dir}\n\
         ScriptFile={dir}/{}.script\n",
        PLYMOUTH_DISPLAY_NAME,
        PLYMOUTH_DESCRIPTION,
        PLYMOUTH_THEME_NAME,
        dir = dir,
    )
}

/// Black background with the logo centred.
const PLYMOUTH_SCRIPT: &str = "\
Window.SetBackgroundTopColor(0, 0, 0);
Window.SetBackgroundBottomColor(0, 0, 0);
splash_image = Image(\"splash.png\");
sprite = Sprite(splash_image);
sprite.SetX(Window.GetWidth() / 2 - splash_image.GetWidth() / 2);
sprite.SetY(Window.GetHeight() / 2 - splash_image.GetHeight() / 2);
";

/// Install the Plymouth theme and rebuild the initramfs around it. Theme
/// selection and initramfs failures only cost the splash.
fn setup_splash(ctx: &BuildContext, rootfs: &Path) -> Result<()> {
    info!("Configuring Plymouth splash screen");
    let logo = &ctx.settings.paths.splash_logo;
    if !logo.is_file() {
        bail!("Splash logo not found: {}", logo.display());
    }

    let theme_dir = rootfs.join(PLYMOUTH_THEMES_DIR).join(PLYMOUTH_THEME_NAME);
    copy_file(logo, &theme_dir.join("splash.png"))?;
    write_file(
        &theme_dir.join(format!("{}.plymouth", PLYMOUTH_THEME_NAME)),
        plymouth_theme(),
    )?;
    write_file(
        &theme_dir.join(format!("{}.script", PLYMOUTH_THEME_NAME)),
        PLYMOUTH_SCRIPT,
    )?;

    if let Err(e) = ctx.exec.run(&CommandSpec::chroot(
        rootfs,
        ["plymouth-set-default-theme", PLYMOUTH_THEME_NAME],
    )) {
        warn!("Failed to set Plymouth theme (plymouth may not be installed): {:#}", e);
    }

    info!("Regenerating initramfs with new theme...");
    if let Err(e) = ctx
        .exec
        .run(&CommandSpec::chroot(rootfs, ["update-initramfs", "-u"]))
    {
        warn!("Failed to regenerate initramfs: {:#}", e);
    }

    let boot = rootfs.join("boot");
    if let Some(initrd) = glob_newest(&boot, "initrd.img-*")? {
        copy_file(&initrd, &boot.join("initrd.img"))?;
    }
    Ok(())
}

fn create_iso(ctx: &BuildContext, rootfs: &Path, staging: &Path, output: &Path) -> Result<()> {
    info!("Creating bootable ISO image...");
    remove_tree(staging)?;
    ensure_dir(&staging.join("live"))?;

    copy_boot_files(rootfs, staging)?;
    strip_boot_files(rootfs)?;

    info!("Creating squashfs filesystem...");
    build_squashfs(
        ctx.exec,
        rootfs,
        &staging.join("live/filesystem.squashfs"),
        &SquashfsOptions::default(),
    )?;

    create_efi_boot_image(
        ctx.exec,
        &staging.join("boot/grub/efiboot.img"),
        &staging.join("efi_mount"),
        &ctx.settings.host.grub_efi,
    )?;

    info!("Running xorriso to create hybrid ISO...");
    build_hybrid_iso(
        ctx.exec,
        staging,
        output,
        &IsoOptions::hybrid(&ctx.settings.host.isolinux_mbr),
    )
}

fn copy_boot_files(rootfs: &Path, staging: &Path) -> Result<()> {
    for file in ["boot/vmlinuz", "boot/initrd.img", "boot/grub/grub.cfg"] {
        copy_file(&rootfs.join(file), &staging.join(file))?;
    }
    copy_dir_recursive(&rootfs.join("isolinux"), &staging.join("isolinux"))
}

/// Bootloader files only the ISO filesystem needs stay out of the squashfs.
fn strip_boot_files(rootfs: &Path) -> Result<()> {
    remove_tree(&rootfs.join("isolinux"))?;
    remove_tree(&rootfs.join("boot/grub/grub.cfg"))
}
