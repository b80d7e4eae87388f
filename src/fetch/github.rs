//! GitHub release host client.
//!
//! Listing: `GET <api_base>/<org>/<repo>/releases` with the JSON media type
//! and the pinned API version header. Assets:
//! `<download_base>/<org>/<repo>/releases/download/<tag>/<asset>`.
//! Timeouts come from the HTTP agent; their expiry is an ordinary error.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use ureq::Agent;

use crate::config::GithubSettings;
use crate::error::{FetchError, ResolveError};
use crate::fetch::ReleaseHost;
use crate::version::{Release, ReleaseSource};

pub struct GithubClient {
    agent: Agent,
    settings: GithubSettings,
}

impl GithubClient {
    pub fn new(settings: &GithubSettings) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(settings.timeout_secs)))
            .build()
            .into();
        Self {
            agent,
            settings: settings.clone(),
        }
    }

    pub fn releases_url(&self, repo: &str) -> String {
        format!(
            "{}/{}/{}/releases",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.org,
            repo
        )
    }

    pub fn asset_url(&self, repo: &str, tag: &str, asset: &str) -> String {
        format!(
            "{}/{}/{}/releases/download/{}/{}",
            self.settings.download_base.trim_end_matches('/'),
            self.settings.org,
            repo,
            tag,
            asset
        )
    }

    fn get(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
        self.agent
            .get(url)
            .header("User-Agent", &self.settings.user_agent)
            .call()
    }
}

impl ReleaseSource for GithubClient {
    fn list_releases(&self, repo: &str) -> Result<Vec<Release>, ResolveError> {
        let url = self.releases_url(repo);
        let mut response = self
            .agent
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", &self.settings.api_version)
            .header("User-Agent", &self.settings.user_agent)
            .call()
            .map_err(|e| ResolveError::Transport(format!("{url}: {e}")))?;

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ResolveError::Transport(format!("{url}: {e}")))?;

        parse_releases(&body)
    }
}

impl ReleaseHost for GithubClient {
    fn download_asset(&self, repo: &str, tag: &str, asset: &str, dest: &Path) -> Result<u64, FetchError> {
        let url = self.asset_url(repo, tag, asset);
        let mut response = self
            .get(&url)
            .map_err(|e| FetchError::Http(format!("{url}: {e}")))?;

        let mut file = File::create(dest)
            .map_err(|e| FetchError::io(format!("creating {}", dest.display()), e))?;
        let mut reader = response.body_mut().as_reader();
        io::copy(&mut reader, &mut file)
            .map_err(|e| FetchError::Http(format!("{url}: {e}")))
    }

    fn fetch_text_asset(&self, repo: &str, tag: &str, asset: &str) -> Result<Option<String>, FetchError> {
        let url = self.asset_url(repo, tag, asset);
        let mut response = match self.get(&url) {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) => return Ok(None),
            Err(e) => return Err(FetchError::Http(format!("{url}: {e}"))),
        };
        response
            .body_mut()
            .read_to_string()
            .map(Some)
            .map_err(|e| FetchError::Http(format!("{url}: {e}")))
    }
}

/// Parse a release listing. Anything but a JSON array is a parse error.
pub fn parse_releases(body: &str) -> Result<Vec<Release>, ResolveError> {
    serde_json::from_str(body).map_err(|e| ResolveError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GithubClient {
        GithubClient::new(&GithubSettings::default())
    }

    #[test]
    fn urls_follow_release_layout() {
        let c = client();
        assert_eq!(
            c.releases_url("installation-wizard"),
            "https://api.github.com/repos/limeos-org/installation-wizard/releases"
        );
        assert_eq!(
            c.asset_url("installation-wizard", "1.2.0", "SHA256SUMS"),
            "https://github.com/limeos-org/installation-wizard/releases/download/1.2.0/SHA256SUMS"
        );
    }

    #[test]
    fn custom_bases_are_trimmed() {
        let settings = GithubSettings {
            org: "fork".into(),
            api_base: "http://localhost:8080/repos/".into(),
            download_base: "http://localhost:8080/".into(),
            ..GithubSettings::default()
        };
        let c = GithubClient::new(&settings);
        assert_eq!(
            c.releases_url("window-manager"),
            "http://localhost:8080/repos/fork/window-manager/releases"
        );
        assert_eq!(
            c.asset_url("window-manager", "v2.0.0", "window-manager"),
            "http://localhost:8080/fork/window-manager/releases/download/v2.0.0/window-manager"
        );
    }

    #[test]
    fn parses_github_listing() {
        let body = r#"[
            {"tag_name": "2.5.0", "name": "2.5.0", "prerelease": false, "draft": false, "assets": []},
            {"tag_name": "2.9.0", "prerelease": true, "draft": false}
        ]"#;
        let releases = parse_releases(body).unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].tag_name, "2.5.0");
        assert!(releases[1].prerelease);
    }

    #[test]
    fn non_array_is_parse_error() {
        let err = parse_releases(r#"{"message": "Not Found"}"#).unwrap_err();
        assert!(matches!(err, ResolveError::Parse(_)));
        assert!(!err.is_transport());
    }
}
