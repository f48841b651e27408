//! Artifact download into a scoped temporary directory.

use crate::deb::{self, PackageMetadata};
use crate::error::{Error, Result};
use crate::release::Asset;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

/// Something that can fetch a URL into a local file.
#[allow(async_fn_in_trait)]
pub trait Downloader {
    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] for transport failures and
    /// [`Error::HttpStatus`] for non-success responses.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Process-private temporary directory for downloads.
///
/// The directory and everything in it is removed when this value is dropped,
/// whether the run succeeded, failed, or was interrupted.
#[derive(Debug)]
pub struct DownloadDir {
    dir: TempDir,
}

impl DownloadDir {
    /// Create a fresh directory under the system temp dir.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("netswitch-installer-")
            .tempdir()?;
        debug!("Download directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Retry policy for downloads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, at least one.
    pub attempts: usize,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// A downloaded and validated package.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    /// Local path inside the [`DownloadDir`].
    pub path: PathBuf,
    /// Control metadata read from the package.
    pub metadata: PackageMetadata,
    /// Hex SHA-256 of the file.
    pub sha256: String,
}

/// Downloads release assets and validates them before use.
pub struct ArtifactFetcher<'a, D> {
    downloader: &'a D,
    policy: RetryPolicy,
    required_arch: String,
}

impl<'a, D: Downloader> ArtifactFetcher<'a, D> {
    /// Create a fetcher for packages targeting `required_arch`.
    #[must_use]
    pub fn new(downloader: &'a D, policy: RetryPolicy, required_arch: &str) -> Self {
        Self {
            downloader,
            policy,
            required_arch: required_arch.to_string(),
        }
    }

    /// Download `asset` into `dir` and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DownloadFailed`] when the transfer fails for good and
    /// [`Error::InvalidArtifact`] when the file is not a usable package.
    pub async fn fetch(&self, asset: &Asset, dir: &DownloadDir) -> Result<FetchedArtifact> {
        let path = dir.path().join(sanitize_file_name(&asset.name));
        info!("Downloading {}", asset.download_url);

        let bytes = self.download_with_retry(&asset.download_url, &path).await?;
        info!("Downloaded {} ({} bytes)", asset.name, bytes);

        let sha256 = file_sha256(&path).await?;
        if let Some(expected) = asset.digest.as_deref().and_then(|d| d.strip_prefix("sha256:")) {
            if !expected.eq_ignore_ascii_case(&sha256) {
                return Err(Error::InvalidArtifact {
                    path,
                    reason: format!("sha256 mismatch: expected {expected}, got {sha256}"),
                });
            }
            debug!("Digest verified: {}", sha256);
        }

        let metadata = deb::inspect(&path)?;
        if metadata.architecture != self.required_arch && metadata.architecture != "all" {
            return Err(Error::InvalidArtifact {
                path,
                reason: format!(
                    "package architecture is {}, expected {} or all",
                    metadata.architecture, self.required_arch
                ),
            });
        }

        info!(
            "Validated {} {} ({})",
            metadata.package, metadata.version, metadata.architecture
        );
        Ok(FetchedArtifact {
            path,
            metadata,
            sha256,
        })
    }

    async fn download_with_retry(&self, url: &str, dest: &Path) -> Result<u64> {
        let retries = self.policy.attempts.max(1) - 1;
        let strategy = FixedInterval::new(self.policy.backoff).take(retries);
        let downloader = self.downloader;
        let mut attempt = 0usize;

        RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                debug!("Download attempt {} of {}", attempt, retries + 1);
                downloader.download(url, dest)
            },
            |e: &Error| {
                let transient = e.is_transient();
                if transient {
                    warn!("Download failed, retrying: {}", e);
                }
                transient
            },
        )
        .await
        .map_err(|e| Error::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Keep only the final path component of an asset name.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if base.is_empty() || base == "." || base == ".." {
        "artifact.deb".to_string()
    } else {
        base.to_string()
    }
}

async fn file_sha256(path: &Path) -> Result<String> {
    let content = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&content)))
}
