//! Release lookup and asset selection.
//!
//! This module handles:
//! - Querying a GitHub-style release index by tag or channel
//! - Picking the one installable asset for the target architecture

mod asset;
mod github;

pub use asset::select_asset;
pub use github::GithubClient;

use crate::config::Channel;
use crate::error::{Error, Result};
use serde::Deserialize;
use tracing::{debug, info};

/// Number of recent releases fetched for channel resolution.
pub const RELEASE_PAGE_SIZE: u8 = 25;

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    /// Git tag, e.g. `v1.2.3`.
    #[serde(rename = "tag_name")]
    pub tag: String,
    /// Unpublished draft.
    #[serde(default)]
    pub draft: bool,
    /// Marked as pre-release.
    #[serde(default)]
    pub prerelease: bool,
    /// Downloadable files in publication order.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    /// Whether this release belongs to `channel`.
    #[must_use]
    pub fn is_on_channel(&self, channel: Channel) -> bool {
        !self.draft && self.prerelease == (channel == Channel::Pre)
    }

    /// Tag parsed as semver, ignoring a leading `v`.
    #[must_use]
    pub fn version(&self) -> Option<semver::Version> {
        semver::Version::parse(self.tag.trim_start_matches('v')).ok()
    }
}

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    /// Content digest such as `sha256:<hex>`, when published.
    #[serde(default)]
    pub digest: Option<String>,
}

/// Which release to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseSelector {
    /// Most recent release on a channel.
    Channel(Channel),
    /// One specific tag.
    Tag(String),
}

impl ReleaseSelector {
    /// Build a selector; a non-blank tag always wins over the channel.
    #[must_use]
    pub fn new(channel: Channel, tag: Option<String>) -> Self {
        match tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(tag) => Self::Tag(tag.to_string()),
            None => Self::Channel(channel),
        }
    }
}

impl std::fmt::Display for ReleaseSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel(channel) => write!(f, "latest {channel} release"),
            Self::Tag(tag) => write!(f, "tag {tag}"),
        }
    }
}

/// A source of release descriptors.
#[allow(async_fn_in_trait)]
pub trait ReleaseIndex {
    /// Most recent releases of `repo`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] on a non-success response.
    async fn recent_releases(&self, repo: &str, per_page: u8) -> Result<Vec<Release>>;

    /// The release tagged `tag`, or `None` if the index has no such tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] on a non-success response other than 404.
    async fn release_by_tag(&self, repo: &str, tag: &str) -> Result<Option<Release>>;
}

/// Resolve `selector` against the release index.
///
/// # Errors
///
/// Returns [`Error::ReleaseNotFound`] if the tag does not exist or the
/// channel has no published release, and propagates index errors.
pub async fn resolve_release<I: ReleaseIndex>(
    index: &I,
    repo: &str,
    selector: &ReleaseSelector,
) -> Result<Release> {
    debug!("Resolving {} in {}", selector, repo);

    let release = match selector {
        ReleaseSelector::Tag(tag) => index
            .release_by_tag(repo, tag)
            .await?
            .ok_or_else(|| Error::ReleaseNotFound(format!("{repo} has no release tagged {tag}")))?,
        ReleaseSelector::Channel(channel) => {
            let releases = index.recent_releases(repo, RELEASE_PAGE_SIZE).await?;
            latest_on_channel(releases, *channel).ok_or_else(|| {
                Error::ReleaseNotFound(format!("{repo} has no published {channel} release"))
            })?
        }
    };

    info!("Resolved {} to {}", selector, release.tag);
    Ok(release)
}

/// First non-draft release on `channel`, preserving index order.
#[must_use]
pub fn latest_on_channel(releases: Vec<Release>, channel: Channel) -> Option<Release> {
    releases.into_iter().find(|r| r.is_on_channel(channel))
}
