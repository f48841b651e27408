//! Error types for netswitch-installer.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way an installation run can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// The installer was not started with root privileges.
    #[error("root privileges are required (effective uid is not 0)")]
    PrivilegeRequired,

    /// Host architecture differs from the architecture the package targets.
    #[error("architecture mismatch: host is {host}, package requires {required}")]
    ArchitectureMismatch {
        /// Architecture reported by the host package manager.
        host: String,
        /// Architecture required by the configuration.
        required: String,
    },

    /// A runtime dependency or host tool could not be provided.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// The release index answered with an unexpected status.
    #[error("release API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// No release matched the requested tag or channel.
    #[error("release not found: {0}")]
    ReleaseNotFound(String),

    /// The release has no asset for the app and architecture.
    #[error("no matching asset in release {tag} for {app} on {arch}")]
    NoMatchingAsset {
        /// Release tag that was searched.
        tag: String,
        /// Application name prefix.
        app: String,
        /// Required architecture.
        arch: String,
    },

    /// The artifact could not be downloaded.
    #[error("download of {url} failed: {reason}")]
    DownloadFailed {
        /// Artifact URL.
        url: String,
        /// Last failure observed.
        reason: String,
    },

    /// The downloaded file is not a usable package.
    #[error("invalid artifact {}: {reason}", path.display())]
    InvalidArtifact {
        /// Local path of the artifact.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The package manager failed even after the repair cycle.
    #[error("package installation failed: {0}")]
    InstallFailed(String),

    /// The service did not become active in time.
    #[error("service {unit} not active after {seconds}s")]
    ActivationTimeout {
        /// Unit name.
        unit: String,
        /// Seconds waited.
        seconds: u64,
    },

    /// The run was interrupted before completing.
    #[error("interrupted")]
    Interrupted,

    /// Transport-level HTTP failure (connect, timeout, body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status on a plain request.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// An external command could not be spawned.
    #[error("failed to run {program}: {source}")]
    Command {
        /// Program name.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a failed transfer is worth another attempt.
    ///
    /// Connection problems, timeouts, rate limiting and server errors are
    /// transient. Client errors such as 404 are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.is_body()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Short operator hint for the failure, if one applies.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::PrivilegeRequired => Some("re-run the installer with sudo"),
            Self::ArchitectureMismatch { .. } => {
                Some("this package only runs on the required architecture; use --arch only for matching hosts")
            }
            Self::Api { status: 403 | 429, .. } => {
                Some("GitHub rate limit reached; export GITHUB_TOKEN or GH_TOKEN and retry")
            }
            Self::ReleaseNotFound(_) => Some("check --repo, --tag or try --pre"),
            Self::InstallFailed(_) => Some("inspect `dpkg --audit` and `apt-get -f install` output"),
            Self::ActivationTimeout { .. } => {
                Some("see the journal lines above, or `journalctl -u <unit> -b`")
            }
            _ => None,
        }
    }
}
