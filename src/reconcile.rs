//! The installation run: preflight through activation check.

use crate::config::InstallerConfig;
use crate::error::{Error, Result};
use crate::fetch::{ArtifactFetcher, DownloadDir, Downloader, RetryPolicy};
use crate::host::Host;
use crate::packages::PackageSession;
use crate::release::{resolve_release, select_asset, ReleaseIndex, ReleaseSelector};
use crate::service::ServiceProvisioner;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Host tools the run depends on.
pub const REQUIRED_TOOLS: [&str; 6] = [
    "dpkg",
    "dpkg-query",
    "apt-get",
    "apt-cache",
    "systemctl",
    "journalctl",
];

/// Steps of an installation run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Privileges, host tools, architecture.
    Preflight,
    /// Runtime dependencies.
    DependencyCheck,
    /// Release lookup and asset selection.
    ReleaseResolution,
    /// Artifact download and validation.
    Download,
    /// Package installation.
    Install,
    /// Unit, defaults and override files; service start.
    Provision,
    /// Waiting for the service to become active.
    ActivationCheck,
    /// Finished successfully.
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preflight => "preflight",
            Self::DependencyCheck => "dependency check",
            Self::ReleaseResolution => "release resolution",
            Self::Download => "download",
            Self::Install => "install",
            Self::Provision => "provision",
            Self::ActivationCheck => "activation check",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Installed package name.
    pub package: String,
    /// Version installed before the run.
    pub previous_version: Option<String>,
    /// Version installed after the run.
    pub installed_version: Option<String>,
    /// Release tag that was installed.
    pub release_tag: String,
    /// Asset file that was installed.
    pub asset_name: String,
    /// Whether a fallback unit was written.
    pub unit_created: bool,
    /// Whether the service was confirmed active.
    pub active: bool,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let before = self.previous_version.as_deref().unwrap_or("none");
        let after = self.installed_version.as_deref().unwrap_or("unknown");
        write!(
            f,
            "{} {} -> {} (release {}, {}); service {}",
            self.package,
            before,
            after,
            self.release_tag,
            self.asset_name,
            if self.active { "active" } else { "inactive" }
        )
    }
}

/// Drives one installation run against a host and a release source.
pub struct Reconciler<'a, H, C> {
    config: &'a InstallerConfig,
    host: &'a H,
    client: &'a C,
}

impl<'a, H, C> Reconciler<'a, H, C>
where
    H: Host,
    C: ReleaseIndex + Downloader,
{
    /// Create a reconciler.
    #[must_use]
    pub fn new(config: &'a InstallerConfig, host: &'a H, client: &'a C) -> Self {
        Self {
            config,
            host,
            client,
        }
    }

    /// Run every stage in order.
    ///
    /// # Errors
    ///
    /// Returns the named error of the first stage that fails.
    pub async fn run(&self) -> Result<Report> {
        let mut stage = Stage::Preflight;
        let result = self.run_stages(&mut stage).await;
        if let Err(ref e) = result {
            error!("Failed during {}: {}", stage, e);
        }
        result
    }

    async fn run_stages(&self, stage: &mut Stage) -> Result<Report> {
        let config = self.config;
        let mut session = PackageSession::new(self.host);

        enter(stage, Stage::Preflight);
        self.preflight(&mut session).await?;

        enter(stage, Stage::DependencyCheck);
        session.ensure_dependencies(&config.dependencies).await?;

        enter(stage, Stage::ReleaseResolution);
        let selector = ReleaseSelector::new(config.channel, config.tag.clone());
        let release = resolve_release(self.client, &config.repo, &selector).await?;
        let asset = select_asset(&release, &config.app_name, &config.arch)?;
        info!("Selected {} from {}", asset.name, release.tag);

        enter(stage, Stage::Download);
        let download_dir = DownloadDir::create()?;
        let policy = RetryPolicy {
            attempts: config.download.attempts,
            backoff: Duration::from_millis(config.download.backoff_ms),
        };
        let fetcher = ArtifactFetcher::new(self.client, policy, &config.arch);
        let artifact = fetcher.fetch(asset, &download_dir).await?;
        info!("{} sha256 {}", asset.name, artifact.sha256);
        if let Some(tagged) = release.version() {
            if !same_version(&tagged, &artifact.metadata.version) {
                warn!(
                    "Release {} carries package version {}",
                    release.tag, artifact.metadata.version
                );
            }
        }

        enter(stage, Stage::Install);
        let package = config.package_name();
        let previous_version = session.installed_version(package).await?;
        match previous_version.as_deref() {
            Some(v) => info!("Currently installed: {} {}", package, v),
            None => info!("{} is not installed yet", package),
        }
        session.stop_service(&config.unit_name()).await?;
        session.install_or_upgrade(&artifact.path).await?;
        let installed_version = session.installed_version(package).await?;
        drop(download_dir);

        match installed_version.as_deref() {
            Some(v) if v != artifact.metadata.version => warn!(
                "dpkg reports {} {} but the artifact was {}",
                package, v, artifact.metadata.version
            ),
            Some(_) => {}
            None => warn!("Could not read installed version of {}", package),
        }
        if let (Some(before), Some(after)) = (&previous_version, &installed_version) {
            if is_downgrade(before, after) {
                warn!(
                    "Installed {} {} is older than the previous {}; {} was requested explicitly",
                    package, after, before, selector
                );
            }
        }

        enter(stage, Stage::Provision);
        let provisioner = ServiceProvisioner::new(self.host, config);
        let outcome = provisioner.provision().await?;

        enter(stage, Stage::ActivationCheck);
        provisioner
            .wait_until_active(
                config.activation_timeout(),
                config.activation_interval(),
                config.activation.log_lines,
            )
            .await?;

        enter(stage, Stage::Done);
        let report = Report {
            package: package.to_string(),
            previous_version,
            installed_version,
            release_tag: release.tag.clone(),
            asset_name: asset.name.clone(),
            unit_created: outcome.unit_created,
            active: true,
        };
        info!("{}", report);
        Ok(report)
    }

    async fn preflight(&self, session: &mut PackageSession<'_, H>) -> Result<()> {
        if !self.host.is_privileged() {
            return Err(Error::PrivilegeRequired);
        }

        let missing: Vec<&str> = REQUIRED_TOOLS
            .iter()
            .copied()
            .filter(|tool| !self.host.has_tool(tool))
            .collect();
        if !missing.is_empty() {
            warn!("Missing host tools: {}", missing.join(", "));
            session.install_tools(&missing).await?;
        }

        let host_arch = session.host_architecture().await?;
        if host_arch != self.config.arch {
            return Err(Error::ArchitectureMismatch {
                host: host_arch,
                required: self.config.arch.clone(),
            });
        }
        info!("Host architecture {} matches", host_arch);
        Ok(())
    }
}

fn enter(current: &mut Stage, next: Stage) {
    *current = next;
    info!("==> {}", next);
}

/// Whether `after` is an older version than `before`.
///
/// Only versions that reduce to semver (epoch and Debian revision removed)
/// are compared; anything else is never reported as a downgrade.
fn is_downgrade(before: &str, after: &str) -> bool {
    match (comparable_version(before), comparable_version(after)) {
        (Some(b), Some(a)) => a < b,
        _ => false,
    }
}

/// Whether a package version string names the release version `tagged`.
fn same_version(tagged: &semver::Version, package_version: &str) -> bool {
    semver::Version::parse(package_version.trim_start_matches('v')).is_ok_and(|v| &v == tagged)
        || comparable_version(package_version).is_some_and(|v| &v == tagged)
}

fn comparable_version(version: &str) -> Option<semver::Version> {
    let without_epoch = version.split_once(':').map_or(version, |(_, rest)| rest);
    let upstream = without_epoch
        .rsplit_once('-')
        .map_or(without_epoch, |(upstream, _)| upstream);
    semver::Version::parse(upstream.trim_start_matches('v')).ok()
}
