//! Debian package management: dependencies, install, version queries.

use crate::config::DependencySpec;
use crate::error::{Error, Result};
use crate::host::Host;
use std::path::Path;
use tracing::{debug, info, warn};

/// Number of stderr lines kept in install failure messages.
const ERROR_TAIL_LINES: usize = 8;

/// Package-manager state for one installer run.
///
/// Tracks whether the package index has been refreshed so that `apt-get
/// update` runs at most once per run, however many steps ask for it.
pub struct PackageSession<'a, H> {
    host: &'a H,
    index_refreshed: bool,
}

impl<'a, H: Host> PackageSession<'a, H> {
    /// Start a session on `host`.
    #[must_use]
    pub fn new(host: &'a H) -> Self {
        Self {
            host,
            index_refreshed: false,
        }
    }

    /// Whether the index was refreshed during this session.
    #[must_use]
    pub fn index_refreshed(&self) -> bool {
        self.index_refreshed
    }

    /// Run `apt-get update` unless it already ran in this session.
    ///
    /// A failed refresh is logged; installs may still succeed from the
    /// existing index.
    ///
    /// # Errors
    ///
    /// Returns an error if apt-get cannot be started.
    pub async fn refresh_index(&mut self) -> Result<()> {
        if self.index_refreshed {
            debug!("Package index already refreshed");
            return Ok(());
        }
        info!("Refreshing package index");
        let out = self.host.run("apt-get", &["update"]).await?;
        if !out.success() {
            warn!("apt-get update failed: {}", out.stderr_tail(3));
        }
        self.index_refreshed = true;
        Ok(())
    }

    /// Whether `name` is installed and configured.
    ///
    /// # Errors
    ///
    /// Returns an error if dpkg-query cannot be started.
    pub async fn is_installed(&self, name: &str) -> Result<bool> {
        let out = self
            .host
            .run("dpkg-query", &["-W", "-f=${Status}", name])
            .await?;
        Ok(out.success() && out.stdout.trim() == "install ok installed")
    }

    /// Installed version of `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if dpkg-query cannot be started.
    pub async fn installed_version(&self, name: &str) -> Result<Option<String>> {
        let out = self
            .host
            .run("dpkg-query", &["-W", "-f=${Version}", name])
            .await?;
        let version = out.stdout.trim();
        if !out.success() || version.is_empty() {
            return Ok(None);
        }
        Ok(Some(version.to_string()))
    }

    /// Whether the index offers an install candidate for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if apt-cache cannot be started.
    pub async fn has_candidate(&self, name: &str) -> Result<bool> {
        let out = self.host.run("apt-cache", &["policy", name]).await?;
        Ok(out.success() && parse_candidate(&out.stdout).is_some())
    }

    /// First of `names` with an install candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if apt-cache cannot be started.
    pub async fn resolve_candidate<'n>(
        &self,
        names: impl IntoIterator<Item = &'n str>,
    ) -> Result<Option<&'n str>> {
        for name in names {
            if self.has_candidate(name).await? {
                debug!("Install candidate found for {}", name);
                return Ok(Some(name));
            }
            debug!("No install candidate for {}", name);
        }
        Ok(None)
    }

    /// Make sure every dependency is installed before the main package.
    ///
    /// Dependencies already present under either name are skipped. Missing
    /// ones are installed under the first name with a candidate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependency`] if a dependency has no candidate
    /// or its installation fails.
    pub async fn ensure_dependencies(&mut self, deps: &[DependencySpec]) -> Result<()> {
        for dep in deps {
            let mut present = None;
            for name in dep.names() {
                if self.is_installed(name).await? {
                    present = Some(name);
                    break;
                }
            }
            if let Some(name) = present {
                debug!("Dependency {} already installed", name);
                continue;
            }

            self.refresh_index().await?;
            let Some(candidate) = self.resolve_candidate(dep.names()).await? else {
                let names: Vec<&str> = dep.names().collect();
                return Err(Error::MissingDependency(format!(
                    "no install candidate for {}",
                    names.join(" or ")
                )));
            };

            info!("Installing dependency {}", candidate);
            let out = self
                .host
                .run(
                    "apt-get",
                    &["install", "-y", "--no-install-recommends", candidate],
                )
                .await?;
            if !out.success() {
                return Err(Error::MissingDependency(format!(
                    "installing {candidate} failed: {}",
                    out.stderr_tail(ERROR_TAIL_LINES)
                )));
            }
        }
        Ok(())
    }

    /// Install or upgrade the package file at `path`.
    ///
    /// On failure, one repair cycle runs: refresh the index, let apt fix
    /// broken dependencies, then retry the install once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstallFailed`] if the retry fails too.
    pub async fn install_or_upgrade(&mut self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        let install_args = ["-i", path_str.as_str()];
        info!("Installing {}", path_str);

        let first = self.host.run("dpkg", &install_args).await?;
        if first.success() {
            return Ok(());
        }

        warn!(
            "dpkg -i failed ({}), attempting dependency repair",
            first.stderr_tail(3)
        );
        self.refresh_index().await?;
        let repair = self.host.run("apt-get", &["-f", "install", "-y"]).await?;
        if !repair.success() {
            warn!("apt-get -f install failed: {}", repair.stderr_tail(3));
        }

        let second = self.host.run("dpkg", &install_args).await?;
        if second.success() {
            info!("Install succeeded after repair");
            return Ok(());
        }

        Err(Error::InstallFailed(second.stderr_tail(ERROR_TAIL_LINES)))
    }

    /// Stop `unit` ahead of an upgrade. Failure is expected on first install.
    ///
    /// # Errors
    ///
    /// Returns an error only if systemctl cannot be started.
    pub async fn stop_service(&self, unit: &str) -> Result<()> {
        let out = self.host.run("systemctl", &["stop", unit]).await?;
        if out.success() {
            info!("Stopped {}", unit);
        } else {
            debug!("Could not stop {} (not installed yet?)", unit);
        }
        Ok(())
    }

    /// Host architecture as reported by dpkg.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependency`] if dpkg cannot report it.
    pub async fn host_architecture(&self) -> Result<String> {
        let out = self.host.run("dpkg", &["--print-architecture"]).await?;
        let arch = out.stdout.trim();
        if !out.success() || arch.is_empty() {
            return Err(Error::MissingDependency(
                "dpkg --print-architecture returned nothing".to_string(),
            ));
        }
        Ok(arch.to_string())
    }

    /// Install the packages providing missing host tools.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependency`] if a tool has no known package,
    /// apt-get is unavailable, or the installation fails.
    pub async fn install_tools(&mut self, missing: &[&str]) -> Result<()> {
        if missing.is_empty() {
            return Ok(());
        }
        if !self.host.has_tool("apt-get") {
            return Err(Error::MissingDependency(format!(
                "required tools missing and apt-get unavailable: {}",
                missing.join(", ")
            )));
        }

        let mut packages: Vec<&str> = Vec::new();
        for tool in missing {
            let package = tool_package(tool).ok_or_else(|| {
                Error::MissingDependency(format!("required tool {tool} is not installed"))
            })?;
            if !packages.contains(&package) {
                packages.push(package);
            }
        }

        self.refresh_index().await?;
        info!("Installing host tools: {}", packages.join(" "));
        let mut args = vec!["install", "-y", "--no-install-recommends"];
        args.extend(&packages);
        let out = self.host.run("apt-get", &args).await?;
        if !out.success() {
            return Err(Error::MissingDependency(format!(
                "installing {} failed: {}",
                packages.join(" "),
                out.stderr_tail(ERROR_TAIL_LINES)
            )));
        }
        Ok(())
    }
}

/// Package providing a host tool.
fn tool_package(tool: &str) -> Option<&'static str> {
    match tool {
        "dpkg" | "dpkg-query" => Some("dpkg"),
        "apt-get" | "apt-cache" => Some("apt"),
        "systemctl" | "journalctl" => Some("systemd"),
        _ => None,
    }
}

/// Extract the `Candidate:` value from `apt-cache policy` output.
fn parse_candidate(policy: &str) -> Option<&str> {
    policy
        .lines()
        .find_map(|line| line.trim().strip_prefix("Candidate:"))
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "(none)")
}
