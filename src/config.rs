//! Build configuration.
//!
//! Three layers, from most to least dynamic:
//!
//! - [`BuildConfig`]: per-run values from the command line (version, cache
//!   toggle) plus the inputs of the rootfs cache key.
//! - [`BuildSettings`]: host-specific paths and endpoints, optionally loaded
//!   from `limeos-build.toml`. Every field has a default.
//! - `const` tables: components, package sets, branding and boot strings.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Settings file looked up in the working directory when `--config` is absent.
pub const DEFAULT_SETTINGS_FILE: &str = "limeos-build.toml";

/// Debian release the base rootfs is bootstrapped from.
pub const DEFAULT_DISTRIBUTION: &str = "bookworm";

/// Bump to invalidate every cached base rootfs.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Directory name under the user cache root.
pub const CACHE_DIR_NAME: &str = "limeos";

pub const ISO_FILENAME_PREFIX: &str = "limeos";
pub const CHECKSUMS_FILENAME: &str = "SHA256SUMS";

pub const OS_NAME: &str = "LimeOS";
pub const OS_ID: &str = "limeos";
pub const OS_HOME_URL: &str = "https://limeos.org";
pub const OS_BASE_ID: &str = "debian";

pub const BOOT_KERNEL_PATH: &str = "/boot/vmlinuz";
pub const BOOT_INITRD_PATH: &str = "/boot/initrd.img";
pub const BOOT_KERNEL_PARAMS: &str = "boot=live quiet splash loglevel=0";
pub const GRUB_MENU_ENTRY_NAME: &str = "LimeOS Installer";

pub const PLYMOUTH_THEMES_DIR: &str = "usr/share/plymouth/themes";
pub const PLYMOUTH_THEME_NAME: &str = "limeos";
pub const PLYMOUTH_DISPLAY_NAME: &str = "LimeOS";
pub const PLYMOUTH_DESCRIPTION: &str = "LimeOS boot splash";

/// Paths inside a rootfs are relative so they can be joined onto the root.
pub const INSTALL_BIN_PATH: &str = "usr/local/bin";
pub const PAYLOAD_ROOTFS_PATH: &str = "usr/share/limeos/rootfs.tar.gz";
pub const PACKAGES_DIR: &str = "usr/share/limeos/packages";
pub const APT_ARCHIVES_DIR: &str = "var/cache/apt/archives";

pub const INSTALLER_SERVICE_NAME: &str = "limeos-installation-wizard";

/// Packages installed into the disk-installable target image.
pub const TARGET_PACKAGES: &[&str] = &[
    "linux-image-amd64",
    "systemd-sysv",
    "dbus",
    "libpam-systemd",
    "policykit-1",
    "locales",
    "console-setup",
    "keyboard-configuration",
    "sudo",
    "network-manager",
    "grub2-common",
    "grub-common",
    "ucf",
    "sensible-utils",
    "libefiboot1",
    "libefivar1",
    "libfuse3-3",
    "os-prober",
];

/// Packages installed into the live carrier image that runs the installer.
pub const CARRIER_PACKAGES: &[&str] = &[
    "linux-image-amd64",
    "systemd-sysv",
    "live-boot",
    "plymouth",
    "plymouth-themes",
    "libncurses6",
    "parted",
    "dosfstools",
    "e2fsprogs",
];

/// BIOS bootloader packages. They conflict with the EFI set, so both are
/// bundled as files and installed by the installer on the target disk.
pub const BIOS_PACKAGES: &[&str] = &["grub-pc", "grub-pc-bin"];
pub const EFI_PACKAGES: &[&str] = &["grub-efi-amd64", "grub-efi-amd64-bin"];

/// Firmware directories (under `/usr/lib/firmware`) kept out of both images,
/// with the kernel modules that would otherwise fail looking for them.
pub const FIRMWARE_MODULES: &[(&str, &[&str])] = &[
    ("iwlwifi", &["iwlwifi", "iwlmvm", "iwldvm"]),
    ("ath9k_htc", &["ath9k", "ath9k_htc"]),
    ("ath10k", &["ath10k_pci", "ath10k_core"]),
    ("ath11k", &["ath11k", "ath11k_pci"]),
    ("ath12k", &["ath12k"]),
    (
        "rtlwifi",
        &["rtlwifi", "rtl8192ce", "rtl8192cu", "rtl8192de", "rtl8192se", "rtl8723ae", "rtl8723be"],
    ),
    ("rtw88", &["rtw88_pci", "rtw88_core"]),
    ("rtw89", &["rtw89_pci", "rtw89_core"]),
    ("mediatek", &["mt7601u", "mt7921e", "mt7921s"]),
    ("mrvl", &["mwifiex", "mwifiex_pcie", "mwifiex_sdio"]),
    ("qca", &["btqca"]),
    ("rtl_nic", &["r8169"]),
    ("cxgb4", &["cxgb4"]),
    ("liquidio", &["liquidio"]),
    ("mellanox", &["mlx4_core", "mlx5_core"]),
    ("netronome", &["nfp"]),
    ("dpaa2", &["fsl_dpaa2_eth"]),
    ("bnx2", &["bnx2"]),
    ("bnx2x", &["bnx2x"]),
    ("cirrus", &["snd_hda_codec_cirrus"]),
];

/// Bluetooth firmware ships from several packages, so the modules are
/// blacklisted wholesale.
pub const BLUETOOTH_MODULES: &[&str] = &["btusb", "btrtl", "btbcm", "btintel", "bluetooth"];

pub const INTEL_SOF_MODULES: &[&str] = &["snd_sof", "snd_sof_pci", "snd_sof_intel_hda_common"];

/// A component binary published as a release asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSpec {
    /// Repository name under the GitHub org; also the release asset name.
    pub repo: &'static str,
    /// File name installed into the carrier's `/usr/local/bin`.
    pub binary_name: &'static str,
    pub required: bool,
}

pub const COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec {
        repo: "installation-wizard",
        binary_name: "limeos-installation-wizard",
        required: true,
    },
    ComponentSpec {
        repo: "window-manager",
        binary_name: "limeos-window-manager",
        required: false,
    },
    ComponentSpec {
        repo: "display-manager",
        binary_name: "limeos-display-manager",
        required: false,
    },
];

pub fn required_components() -> impl Iterator<Item = &'static ComponentSpec> {
    COMPONENTS.iter().filter(|c| c.required)
}

pub fn optional_components() -> impl Iterator<Item = &'static ComponentSpec> {
    COMPONENTS.iter().filter(|c| !c.required)
}

/// Immutable per-run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Requested OS version, exactly as passed on the command line.
    pub version: String,
    pub use_cache: bool,
    pub distribution: String,
    pub cache_schema_version: u32,
}

impl BuildConfig {
    pub fn new(version: impl Into<String>, use_cache: bool) -> Self {
        Self {
            version: version.into(),
            use_cache,
            distribution: DEFAULT_DISTRIBUTION.to_string(),
            cache_schema_version: CACHE_SCHEMA_VERSION,
        }
    }

    /// Version without a leading `v`/`V`, as written into branding files.
    pub fn clean_version(&self) -> &str {
        crate::version::strip_prefix(&self.version)
    }

    pub fn iso_file_name(&self) -> String {
        format!("{}-{}.iso", ISO_FILENAME_PREFIX, self.version)
    }

    pub fn manifest_file_name(&self) -> String {
        format!("{}-{}.build.json", ISO_FILENAME_PREFIX, self.version)
    }
}

/// Host paths and endpoints. Loaded from TOML; every section is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSettings {
    pub github: GithubSettings,
    pub paths: PathSettings,
    pub host: HostFiles,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GithubSettings {
    pub org: String,
    pub api_base: String,
    pub api_version: String,
    pub download_base: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            org: "limeos-org".to_string(),
            api_base: "https://api.github.com/repos".to_string(),
            api_version: "2022-11-28".to_string(),
            download_base: "https://github.com".to_string(),
            user_agent: "limeos-iso-builder/1.0".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PathSettings {
    /// Local component binaries, preferred over release downloads.
    pub local_bin_dir: PathBuf,
    /// Scratch space for every intermediate image. Wiped at start and end.
    pub build_dir: PathBuf,
    /// Where the ISO and build manifest are written.
    pub output_dir: PathBuf,
    pub splash_logo: PathBuf,
    pub black_png: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            local_bin_dir: PathBuf::from("./bin"),
            build_dir: PathBuf::from("./build"),
            output_dir: PathBuf::from("."),
            splash_logo: PathBuf::from("./assets/splash.png"),
            black_png: PathBuf::from("./assets/black.png"),
        }
    }
}

/// Boot files taken from the build host's syslinux/isolinux/GRUB packages.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HostFiles {
    pub isolinux_bin: PathBuf,
    pub isolinux_mbr: PathBuf,
    pub ldlinux: PathBuf,
    pub vesamenu: PathBuf,
    pub libutil: PathBuf,
    pub libcom32: PathBuf,
    pub grub_efi: PathBuf,
}

impl Default for HostFiles {
    fn default() -> Self {
        Self {
            isolinux_bin: PathBuf::from("/usr/lib/ISOLINUX/isolinux.bin"),
            isolinux_mbr: PathBuf::from("/usr/lib/ISOLINUX/isohdpfx.bin"),
            ldlinux: PathBuf::from("/usr/lib/syslinux/modules/bios/ldlinux.c32"),
            vesamenu: PathBuf::from("/usr/lib/syslinux/modules/bios/vesamenu.c32"),
            libutil: PathBuf::from("/usr/lib/syslinux/modules/bios/libutil.c32"),
            libcom32: PathBuf::from("/usr/lib/syslinux/modules/bios/libcom32.c32"),
            grub_efi: PathBuf::from("/usr/lib/grub/x86_64-efi/monolithic/grubx64.efi"),
        }
    }
}

impl HostFiles {
    /// Syslinux modules copied into `isolinux/`, paired with their file names.
    pub fn isolinux_modules(&self) -> [(&Path, &'static str); 4] {
        [
            (self.ldlinux.as_path(), "ldlinux.c32"),
            (self.vesamenu.as_path(), "vesamenu.c32"),
            (self.libutil.as_path(), "libutil.c32"),
            (self.libcom32.as_path(), "libcom32.c32"),
        ]
    }
}

impl BuildSettings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse build settings")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    /// Load `explicit` if given, else the default file if it exists, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_SETTINGS_FILE);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Resolve the cache root from the process environment.
pub fn cache_root() -> Result<PathBuf> {
    cache_root_from(
        std::env::var_os("XDG_CACHE_HOME"),
        std::env::var_os("HOME"),
    )
}

/// `$XDG_CACHE_HOME/limeos`, else `$HOME/.cache/limeos`. Empty values count as unset.
pub fn cache_root_from(xdg_cache_home: Option<OsString>, home: Option<OsString>) -> Result<PathBuf> {
    if let Some(xdg) = xdg_cache_home.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join(CACHE_DIR_NAME));
    }
    if let Some(home) = home.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home).join(".cache").join(CACHE_DIR_NAME));
    }
    bail!("Cannot determine cache directory: neither XDG_CACHE_HOME nor HOME is set")
}
