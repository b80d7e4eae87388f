//! Typed error outcomes.
//!
//! Most of the builder reports failures through `anyhow` with context
//! attached at each layer. The enums here exist where a caller has to
//! tell failures apart: the version resolver (transport failures degrade,
//! everything else does not), component downloads (checksum mismatches),
//! and the top-level build (cancellation maps to a different exit code).

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Exit code for a successful build.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code for any failed build.
pub const EXIT_FAILURE: u8 = 1;

/// Exit code for a build cancelled by SIGINT/SIGTERM (128 + SIGINT).
pub const EXIT_CANCELLED: u8 = 130;

/// Failure to pick a release tag for a component.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid version format: {0}")]
    InvalidVersionFormat(String),

    #[error("no release of {component} matches major version {major}")]
    NoMatchingVersion { component: String, major: u64 },

    /// The release listing could not be retrieved at all.
    #[error("release listing request failed: {0}")]
    Transport(String),

    #[error("unexpected release listing response: {0}")]
    Parse(String),
}

impl ResolveError {
    /// Whether the caller should fall back to the requested version verbatim.
    pub fn is_transport(&self) -> bool {
        matches!(self, ResolveError::Transport(_))
    }
}

/// Failure to fetch a component binary or its checksum manifest.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("downloaded file is empty: {0}")]
    EmptyDownload(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl FetchError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FetchError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Top-level build failure, mapped to a process exit code by the binary.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid version format: {0} (expected X.Y.Z or vX.Y.Z)")]
    InvalidVersion(String),

    #[error("this program must be run as root")]
    NotRoot,

    #[error("failed to load settings from {path}")]
    Settings {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("host is missing build dependencies")]
    Preflight(#[source] anyhow::Error),

    #[error("invalid pipeline plan: {0}")]
    InvalidPlan(String),

    #[error("failed to prepare build directory")]
    Workspace(#[source] anyhow::Error),

    #[error("{stage} phase failed")]
    StageFailed {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("build cancelled by signal during {stage} phase")]
    Cancelled { stage: Stage },
}

impl BuildError {
    pub fn exit_code(&self) -> u8 {
        match self {
            BuildError::Cancelled { .. } => EXIT_CANCELLED,
            _ => EXIT_FAILURE,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Cancelled { .. })
    }
}
