//! The five build phases and the context they share.
//!
//! ```text
//! preparation ──► components/ ─────────────────────────────┐
//! base ────────► base/ ──┬──► target ──► rootfs.tar.gz ──┐ │
//!                        └──► carrier ◄──────────────────┘◄┘
//!                                │
//!                                ▼
//!                            assembly ──► <output_dir>/limeos-<version>.iso
//! ```
//!
//! Each phase is a plain function of the [`BuildContext`]; [`Phases`] binds
//! them to [`Stage`]s for the runner.

pub mod assembly;
pub mod base;
pub mod brand;
pub mod carrier;
pub mod preparation;
pub mod strip;
pub mod target;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::artifact::filesystem::{glob_in, remove_tree};
use crate::cache::PackageCacheMount;
use crate::config::{BuildConfig, BuildSettings};
use crate::fetch::ReleaseHost;
use crate::pipeline::{Stage, StageHandler};
use crate::process::{CommandExecutor, CommandSpec};

pub use preparation::{ComponentSource, ResolvedComponent};

/// Fixed locations inside the build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub build_dir: PathBuf,
    pub components: PathBuf,
    pub base: PathBuf,
    pub target: PathBuf,
    pub carrier: PathBuf,
    pub rootfs_tarball: PathBuf,
    pub staging: PathBuf,
}

impl Layout {
    pub fn new(build_dir: &Path) -> Self {
        Self {
            build_dir: build_dir.to_path_buf(),
            components: build_dir.join("components"),
            base: build_dir.join("base"),
            target: build_dir.join("target"),
            carrier: build_dir.join("carrier"),
            rootfs_tarball: build_dir.join("rootfs.tar.gz"),
            staging: build_dir.join("staging-iso"),
        }
    }

    /// Location of a named intermediate artifact, for artifacts that live
    /// inside the build directory.
    pub fn intermediate(&self, name: &str) -> Option<&Path> {
        match name {
            "components" => Some(&self.components),
            "base" => Some(&self.base),
            "rootfs.tar.gz" => Some(&self.rootfs_tarball),
            "carrier" => Some(&self.carrier),
            _ => None,
        }
    }
}

/// Everything a phase reads. Built once per run.
pub struct BuildContext<'a> {
    pub config: &'a BuildConfig,
    pub settings: &'a BuildSettings,
    pub layout: Layout,
    pub exec: &'a dyn CommandExecutor,
    pub host: &'a dyn ReleaseHost,
    /// Cache root for this run. `None` when caching is disabled.
    pub cache_root: Option<PathBuf>,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        config: &'a BuildConfig,
        settings: &'a BuildSettings,
        exec: &'a dyn CommandExecutor,
        host: &'a dyn ReleaseHost,
        cache_root: Option<PathBuf>,
    ) -> Self {
        Self {
            config,
            settings,
            layout: Layout::new(&settings.paths.build_dir),
            exec,
            host,
            cache_root: if config.use_cache { cache_root } else { None },
        }
    }

    pub fn iso_path(&self) -> PathBuf {
        self.settings
            .paths
            .output_dir
            .join(self.config.iso_file_name())
    }
}

/// `cp -a <base> <dest>` onto a fresh `dest`.
pub(crate) fn derive_rootfs(ctx: &BuildContext, dest: &Path) -> Result<()> {
    remove_tree(dest)?;
    ctx.exec
        .run(
            &CommandSpec::new("cp")
                .arg("-a")
                .arg_path(&ctx.layout.base)
                .arg_path(dest),
        )
        .with_context(|| format!("Failed to copy base rootfs to {}", dest.display()))
}

/// Bind the host package cache into `rootfs` when caching is on. A mount
/// failure only costs the cache; the install proceeds without it.
pub(crate) fn mount_package_cache<'a>(ctx: &BuildContext<'a>, rootfs: &Path) -> Option<PackageCacheMount<'a>> {
    let cache_root = ctx.cache_root.as_deref()?;
    match PackageCacheMount::mount(ctx.exec, cache_root, rootfs) {
        Ok(mount) => Some(mount),
        Err(e) => {
            warn!("{:#}, installing without package cache", e);
            None
        }
    }
}

/// `apt-get install -y --no-install-recommends <packages>` inside `rootfs`,
/// with the package cache mounted around it.
pub(crate) fn install_packages(ctx: &BuildContext, rootfs: &Path, packages: &[&str]) -> Result<()> {
    let mount = mount_package_cache(ctx, rootfs);

    let installed = ctx.exec.run(
        &CommandSpec::chroot(rootfs, ["apt-get", "install", "-y", "--no-install-recommends"])
            .args(packages)
            .env("DEBIAN_FRONTEND", "noninteractive"),
    );

    if let Some(mount) = mount {
        if let Err(e) = mount.release() {
            warn!("{:#}", e);
        }
    }
    installed
}

/// Drop downloaded archives and package lists from a finished rootfs.
pub(crate) fn clean_apt(ctx: &BuildContext, rootfs: &Path) -> Result<()> {
    ctx.exec
        .run(&CommandSpec::chroot(rootfs, ["apt-get", "clean"]))?;

    let lists = rootfs.join("var/lib/apt/lists");
    for path in glob_in(&lists, "*")? {
        remove_tree(&path)?;
    }
    for path in glob_in(&rootfs.join("var/cache/apt"), "*.bin")? {
        remove_tree(&path)?;
    }
    Ok(())
}

/// The production [`StageHandler`]: runs each phase against one context and
/// keeps what the manifest needs.
pub struct Phases<'a> {
    ctx: BuildContext<'a>,
    components: Vec<ResolvedComponent>,
    iso: Option<PathBuf>,
}

impl<'a> Phases<'a> {
    pub fn new(ctx: BuildContext<'a>) -> Self {
        Self {
            ctx,
            components: Vec::new(),
            iso: None,
        }
    }

    pub fn components(&self) -> &[ResolvedComponent] {
        &self.components
    }

    pub fn iso(&self) -> Option<&Path> {
        self.iso.as_deref()
    }
}

impl StageHandler for Phases<'_> {
    fn run_stage(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Preparation => {
                self.components = preparation::run(&self.ctx)?;
            }
            Stage::Base => base::run(&self.ctx)?,
            Stage::Target => target::run(&self.ctx)?,
            Stage::Carrier => carrier::run(&self.ctx)?,
            Stage::Assembly => {
                let iso = assembly::run(&self.ctx)?;
                info!("ISO written to {}", iso.display());
                self.iso = Some(iso);
            }
        }
        Ok(())
    }
}
