//! `limeos-<version>.build.json`: what a run built and from which
//! component releases.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::cache::CacheKey;
use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::phases::ResolvedComponent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn from_result<T>(result: &Result<T, BuildError>) -> Self {
        match result {
            Ok(_) => BuildStatus::Success,
            Err(e) if e.is_cancelled() => BuildStatus::Cancelled,
            Err(_) => BuildStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildManifest {
    pub version: String,
    pub status: BuildStatus,
    pub created_at_utc: String,
    pub finished_at_utc: Option<String>,
    /// Rootfs cache key in effect; `None` for `--no-cache` runs.
    pub cache_key: Option<String>,
    pub components: Vec<ResolvedComponent>,
}

impl BuildManifest {
    /// Start a record for `config`, stamped now.
    pub fn begin(config: &BuildConfig) -> Self {
        Self {
            version: config.version.clone(),
            status: BuildStatus::Failed,
            created_at_utc: now_utc(),
            finished_at_utc: None,
            cache_key: config
                .use_cache
                .then(|| CacheKey::for_config(config).as_str().to_string()),
            components: Vec::new(),
        }
    }

    pub fn finish(&mut self, status: BuildStatus, components: &[ResolvedComponent]) {
        self.status = status;
        self.finished_at_utc = Some(now_utc());
        self.components = components.to_vec();
    }

    pub fn path_in(&self, output_dir: &Path, config: &BuildConfig) -> PathBuf {
        output_dir.join(config.manifest_file_name())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
            .with_context(|| format!("Failed to write build manifest {}", path.display()))
    }

    /// Write the manifest, downgrading failure to a warning.
    pub fn write_best_effort(&self, path: &Path) {
        match self.write(path) {
            Ok(()) => info!("Build manifest written to {}", path.display()),
            Err(e) => warn!("{:#}", e),
        }
    }
}

fn now_utc() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path without parent '{}'", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    let payload = serde_json::to_vec_pretty(value).context("serializing build manifest")?;
    fs::write(&tmp, payload).with_context(|| format!("writing temp file '{}'", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "renaming temp file '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::ComponentSource;
    use crate::pipeline::Stage;
    use tempfile::TempDir;

    fn wizard() -> ResolvedComponent {
        ResolvedComponent {
            repo: "installation-wizard".into(),
            requested: "1.0.0".into(),
            tag: Some("1.0.3".into()),
            source: ComponentSource::Remote,
        }
    }

    #[test]
    fn status_from_result() {
        assert_eq!(BuildStatus::from_result(&Ok::<(), BuildError>(())), BuildStatus::Success);
        assert_eq!(
            BuildStatus::from_result::<()>(&Err(BuildError::Cancelled { stage: Stage::Base })),
            BuildStatus::Cancelled
        );
        assert_eq!(
            BuildStatus::from_result::<()>(&Err(BuildError::NotRoot)),
            BuildStatus::Failed
        );
    }

    #[test]
    fn writes_json_record() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::new("1.0.0", true);
        let mut manifest = BuildManifest::begin(&config);
        manifest.finish(BuildStatus::Success, &[wizard()]);

        let path = manifest.path_in(temp.path(), &config);
        assert_eq!(path, temp.path().join("limeos-1.0.0.build.json"));
        manifest.write(&path).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["version"], "1.0.0");
        assert_eq!(json["cache_key"].as_str().unwrap().len(), 64);
        assert_eq!(json["components"][0]["tag"], "1.0.3");
        assert_eq!(json["components"][0]["source"], "remote");
        assert!(json["finished_at_utc"].is_string());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn no_cache_key_without_caching() {
        let manifest = BuildManifest::begin(&BuildConfig::new("1.0.0", false));
        assert!(manifest.cache_key.is_none());
        assert!(manifest.created_at_utc.ends_with('Z'));
    }
}
