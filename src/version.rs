//! Version validation, comparison and release selection.
//!
//! A requested OS version like `1.4.0` pins every component to the newest
//! stable release sharing its major version. Comparison is plain dotted
//! integers: `v1.10.0 > 1.9.0`, and a version that runs out of segments
//! compares as if padded with zeros (`1.2 == 1.2.0`).

use std::cmp::Ordering;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ResolveError;

/// A published release as returned by the release host.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
}

impl Release {
    pub fn new(tag_name: impl Into<String>, prerelease: bool, draft: bool) -> Self {
        Self {
            tag_name: tag_name.into(),
            prerelease,
            draft,
        }
    }
}

/// Anything that can list the releases of a component.
pub trait ReleaseSource {
    fn list_releases(&self, component: &str) -> Result<Vec<Release>, ResolveError>;
}

/// A component's requested version and the tag chosen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub component: String,
    pub requested: String,
    pub tag: String,
}

/// Drop one leading `v`/`V`.
pub fn strip_prefix(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

/// Accepts exactly `^[vV]?\d+\.\d+\.\d+$`.
pub fn is_valid_version(version: &str) -> bool {
    let parts: Vec<&str> = strip_prefix(version).split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Leading integer of a version, ignoring a `v`/`V` prefix.
///
/// `"2.5.0" -> 2`, `"v10" -> 10`, `"3-rc1" -> 3`. Fails when the version does
/// not start with a digit.
pub fn major_version(version: &str) -> Result<u64, ResolveError> {
    let digits: String = strip_prefix(version)
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse()
        .map_err(|_| ResolveError::InvalidVersionFormat(version.to_string()))
}

/// Integer segments of a version; a non-numeric tail inside a segment is
/// ignored (`"3-beta"` reads as 3).
fn segments(version: &str) -> Vec<u64> {
    strip_prefix(version)
        .split('.')
        .map(|seg| {
            let digits: String = seg.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

/// Dotted-integer comparison. Missing trailing segments count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a, b) = (segments(a), segments(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Newest stable release with the requested major version.
pub fn select_release<'a>(
    component: &str,
    requested: &str,
    releases: &'a [Release],
) -> Result<&'a Release, ResolveError> {
    let major = major_version(requested)?;

    releases
        .iter()
        .filter(|r| !r.prerelease && !r.draft)
        .filter(|r| major_version(&r.tag_name).ok() == Some(major))
        .max_by(|a, b| compare_versions(&a.tag_name, &b.tag_name))
        .ok_or_else(|| ResolveError::NoMatchingVersion {
            component: component.to_string(),
            major,
        })
}

/// Resolve `requested` to a concrete release tag of `component`.
pub fn resolve<S: ReleaseSource + ?Sized>(
    source: &S,
    component: &str,
    requested: &str,
) -> Result<ResolvedVersion, ResolveError> {
    // Validate before touching the network.
    major_version(requested)?;

    let releases = source.list_releases(component)?;
    let release = select_release(component, requested, &releases)?;

    info!("Resolved {} version: {} -> {}", component, requested, release.tag_name);
    Ok(ResolvedVersion {
        component: component.to_string(),
        requested: requested.to_string(),
        tag: release.tag_name.clone(),
    })
}

/// [`resolve`], degrading to the requested version verbatim when the
/// release listing cannot be retrieved. Other failures are returned.
pub fn resolve_or_fallback<S: ReleaseSource + ?Sized>(
    source: &S,
    component: &str,
    requested: &str,
) -> Result<ResolvedVersion, ResolveError> {
    match resolve(source, component, requested) {
        Err(e) if e.is_transport() => {
            warn!(
                "Version resolution failed for {} ({}), using exact version {}",
                component, e, requested
            );
            Ok(ResolvedVersion {
                component: component.to_string(),
                requested: requested.to_string(),
                tag: requested.to_string(),
            })
        }
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::Cell;

    /// Serves a fixed release list, or a transport failure.
    pub(crate) struct StaticReleases {
        pub(crate) releases: Option<Vec<Release>>,
        pub(crate) requests: Cell<usize>,
    }

    impl StaticReleases {
        pub(crate) fn new(releases: Vec<Release>) -> Self {
            Self {
                releases: Some(releases),
                requests: Cell::new(0),
            }
        }

        pub(crate) fn offline() -> Self {
            Self {
                releases: None,
                requests: Cell::new(0),
            }
        }
    }

    impl ReleaseSource for StaticReleases {
        fn list_releases(&self, _component: &str) -> Result<Vec<Release>, ResolveError> {
            self.requests.set(self.requests.get() + 1);
            self.releases
                .clone()
                .ok_or_else(|| ResolveError::Transport("connection refused".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StaticReleases;
    use super::*;

    fn sample() -> Vec<Release> {
        vec![
            Release::new("2.3.1", false, false),
            Release::new("2.5.0", false, false),
            Release::new("3.0.0", false, false),
            Release::new("2.9.0", true, false),
        ]
    }

    #[test]
    fn validation() {
        for ok in ["1.2.3", "v1.2.3", "V10.20.30", "0.0.0"] {
            assert!(is_valid_version(ok), "{ok} should be valid");
        }
        for bad in ["1.2", "abc", "1.2.3.4", "1.2.3-beta", "", "v", "1..3", "vv1.2.3", " 1.2.3"] {
            assert!(!is_valid_version(bad), "{bad} should be invalid");
        }
    }

    #[test]
    fn major_extraction() {
        assert_eq!(major_version("2.5.0").unwrap(), 2);
        assert_eq!(major_version("v10.0.1").unwrap(), 10);
        assert_eq!(major_version("V3").unwrap(), 3);
        assert_eq!(major_version("4-rc1").unwrap(), 4);
        assert!(matches!(
            major_version("abc"),
            Err(ResolveError::InvalidVersionFormat(_))
        ));
        assert!(major_version("").is_err());
    }

    #[test]
    fn comparison_order() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("v1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
        assert_eq!(compare_versions("1.9.0", "1.10.0"), Ordering::Less);
    }

    #[test]
    fn selects_newest_stable_in_major() {
        let releases = sample();
        let chosen = select_release("installation-wizard", "2.0.0", &releases).unwrap();
        assert_eq!(chosen.tag_name, "2.5.0");
    }

    #[test]
    fn drafts_are_excluded() {
        let mut releases = sample();
        releases.push(Release::new("2.8.0", false, true));
        let chosen = select_release("installation-wizard", "v2.0.0", &releases).unwrap();
        assert_eq!(chosen.tag_name, "2.5.0");
    }

    #[test]
    fn prefixed_tags_are_candidates() {
        let releases = vec![Release::new("v1.2.0", false, false), Release::new("1.10.0", false, false)];
        let chosen = select_release("window-manager", "1.0.0", &releases).unwrap();
        assert_eq!(chosen.tag_name, "1.10.0");
    }

    #[test]
    fn no_match_is_distinguished() {
        let source = StaticReleases::new(sample());
        let err = resolve(&source, "installation-wizard", "5.0.0").unwrap_err();
        assert!(matches!(err, ResolveError::NoMatchingVersion { major: 5, .. }));
        assert!(!err.is_transport());
    }

    #[test]
    fn resolve_returns_tag() {
        let source = StaticReleases::new(sample());
        let resolved = resolve(&source, "installation-wizard", "2.0.0").unwrap();
        assert_eq!(resolved.tag, "2.5.0");
        assert_eq!(resolved.requested, "2.0.0");
        assert_eq!(source.requests.get(), 1);
    }

    #[test]
    fn invalid_request_skips_network() {
        let source = StaticReleases::new(sample());
        assert!(matches!(
            resolve(&source, "installation-wizard", "latest"),
            Err(ResolveError::InvalidVersionFormat(_))
        ));
        assert_eq!(source.requests.get(), 0);
    }

    #[test]
    fn transport_failure_falls_back_to_requested() {
        let source = StaticReleases::offline();
        let resolved = resolve_or_fallback(&source, "display-manager", "v1.4.2").unwrap();
        assert_eq!(resolved.tag, "v1.4.2");
    }

    #[test]
    fn no_match_does_not_fall_back() {
        let source = StaticReleases::new(sample());
        assert!(resolve_or_fallback(&source, "installation-wizard", "5.0.0").is_err());
    }

    #[test]
    fn release_json_defaults_missing_flags() {
        let json = r#"[{"tag_name":"1.0.0"},{"tag_name":"1.1.0","prerelease":true,"draft":false,"name":"x"}]"#;
        let releases: Vec<Release> = serde_json::from_str(json).unwrap();
        assert_eq!(releases[0], Release::new("1.0.0", false, false));
        assert!(releases[1].prerelease);
    }
}
