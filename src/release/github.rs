//! GitHub release index client.

use super::{Release, ReleaseIndex};
use crate::error::{Error, Result};
use crate::fetch::Downloader;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Environment variables searched for an API token, in order.
pub const TOKEN_VARS: [&str; 2] = ["GITHUB_TOKEN", "GH_TOKEN"];

/// Talks to the GitHub REST API and downloads release assets.
#[derive(Debug, Clone)]
pub struct GithubClient {
    api_base: Url,
    http: reqwest::Client,
    authenticated: bool,
}

impl GithubClient {
    /// Create a client, picking up a token from the environment if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_env(api_base: &str, timeout: Duration) -> Result<Self> {
        let token = TOKEN_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()));
        Self::new(api_base, token.as_deref(), timeout)
    }

    /// Create a client with an optional bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_base: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|e| Error::Config(format!("invalid API token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let api_base = Url::parse(api_base.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("invalid API base {api_base}: {e}")))?;
        if api_base.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid API base {api_base}")));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("netswitch-installer/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        debug!(
            "GitHub client for {} ({})",
            api_base,
            if token.is_some() { "authenticated" } else { "anonymous" }
        );

        Ok(Self {
            api_base,
            http,
            authenticated: token.is_some(),
        })
    }

    /// Whether requests carry a bearer token.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// `<api_base>/repos/<owner>/<name>/<segments...>`, each segment
    /// percent-encoded.
    fn repo_url(&self, repo: &str, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("repos")
                .extend(repo.split('/').filter(|s| !s.is_empty()))
                .extend(segments);
        }
        url
    }

    async fn api_error(response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(300)
            .collect();
        Error::Api { status, message }
    }
}

impl ReleaseIndex for GithubClient {
    async fn recent_releases(&self, repo: &str, per_page: u8) -> Result<Vec<Release>> {
        let mut url = self.repo_url(repo, &["releases"]);
        url.query_pairs_mut()
            .append_pair("per_page", &per_page.to_string());
        debug!("Fetching {}", url);

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn release_by_tag(&self, repo: &str, tag: &str) -> Result<Option<Release>> {
        let url = self.repo_url(repo, &["releases", "tags", tag]);
        debug!("Fetching {}", url);

        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(Some(response.json().await?))
    }
}

impl Downloader for GithubClient {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .http
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::FORBIDDEN && !self.authenticated {
                warn!("Download forbidden; anonymous requests may be rate limited");
            }
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}
