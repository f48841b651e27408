//! systemd unit, defaults file and drop-in provisioning.

use crate::config::{GpioDefaults, InstallerConfig};
use crate::error::{Error, Result};
use crate::host::Host;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What provisioning changed on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// A fallback unit file was written.
    pub unit_created: bool,
    /// A new defaults file was written.
    pub defaults_created: bool,
}

/// Creates and starts the systemd service for the installed package.
pub struct ServiceProvisioner<'a, H> {
    host: &'a H,
    app_name: String,
    unit_dir: PathBuf,
    bin_dir: PathBuf,
    defaults_file: PathBuf,
    defaults: GpioDefaults,
}

impl<'a, H: Host> ServiceProvisioner<'a, H> {
    /// Create a provisioner from the installer configuration.
    #[must_use]
    pub fn new(host: &'a H, config: &InstallerConfig) -> Self {
        Self {
            host,
            app_name: config.app_name.clone(),
            unit_dir: config.paths.unit_dir.clone(),
            bin_dir: config.paths.bin_dir.clone(),
            defaults_file: config.defaults_file(),
            defaults: config.defaults.clone(),
        }
    }

    /// Unit name, `<app>.service`.
    #[must_use]
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.app_name)
    }

    /// Path of the fallback unit file.
    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(self.unit_name())
    }

    /// Path of the drop-in override fragment.
    #[must_use]
    pub fn override_path(&self) -> PathBuf {
        self.unit_dir
            .join(format!("{}.d", self.unit_name()))
            .join("override.conf")
    }

    /// Provision unit, defaults and override, then (re)start the service.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written or systemctl cannot be
    /// started. Failing enable/restart commands are only logged.
    pub async fn provision(&self) -> Result<ProvisionOutcome> {
        let unit = self.unit_name();

        let unit_created = if self.unit_registered().await? {
            debug!("{} already registered, leaving unit file alone", unit);
            false
        } else {
            info!("No {} registered, writing fallback unit", unit);
            write_file(&self.unit_path(), &self.render_unit())?;
            true
        };

        let defaults_created = create_if_absent(
            &self.defaults_file,
            &self.defaults.render(&self.app_name),
        )?;
        if defaults_created {
            info!("Created {}", self.defaults_file.display());
        } else {
            info!("Keeping existing {}", self.defaults_file.display());
        }

        write_file(&self.override_path(), &self.render_override())?;
        debug!("Wrote {}", self.override_path().display());

        self.systemctl_logged(&["daemon-reload"]).await?;
        self.systemctl_logged(&["enable", "--now", unit.as_str()]).await?;
        self.systemctl_logged(&["restart", unit.as_str()]).await?;

        Ok(ProvisionOutcome {
            unit_created,
            defaults_created,
        })
    }

    /// Whether systemd knows the unit.
    ///
    /// # Errors
    ///
    /// Returns an error if systemctl cannot be started.
    pub async fn unit_registered(&self) -> Result<bool> {
        let unit = self.unit_name();
        let out = self
            .host
            .run("systemctl", &["list-unit-files", "--no-legend", unit.as_str()])
            .await?;
        Ok(out.success()
            && out
                .stdout
                .lines()
                .any(|line| line.split_whitespace().next() == Some(unit.as_str())))
    }

    /// Whether the unit is currently active.
    ///
    /// # Errors
    ///
    /// Returns an error if systemctl cannot be started.
    pub async fn is_active(&self) -> Result<bool> {
        let unit = self.unit_name();
        let out = self
            .host
            .run("systemctl", &["is-active", "--quiet", unit.as_str()])
            .await?;
        Ok(out.success())
    }

    /// Poll until the unit is active or `timeout` elapses.
    ///
    /// On timeout the last `log_lines` journal lines are logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ActivationTimeout`] if the unit never became active.
    pub async fn wait_until_active(
        &self,
        timeout: Duration,
        interval: Duration,
        log_lines: u32,
    ) -> Result<()> {
        let unit = self.unit_name();
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_active().await? {
                info!("{} is active", unit);
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        error!("{} did not become active within {:?}", unit, timeout);
        if let Err(e) = self.dump_journal(log_lines).await {
            warn!("Could not read the journal for {}: {}", unit, e);
        }
        Err(Error::ActivationTimeout {
            unit,
            seconds: timeout.as_secs(),
        })
    }

    async fn dump_journal(&self, lines: u32) -> Result<()> {
        let unit = self.unit_name();
        let count = lines.to_string();
        let out = self
            .host
            .run("journalctl", &["-u", unit.as_str(), "-n", count.as_str(), "--no-pager"])
            .await?;
        error!("Last {} journal lines for {}:", lines, unit);
        for line in out.stdout.lines() {
            error!("  {}", line);
        }
        if !out.success() {
            warn!("journalctl failed: {}", out.stderr_tail(3));
        }
        Ok(())
    }

    async fn systemctl_logged(&self, args: &[&str]) -> Result<()> {
        let out = self.host.run("systemctl", args).await?;
        if !out.success() {
            warn!("systemctl {} failed: {}", args.join(" "), out.stderr_tail(3));
        }
        Ok(())
    }

    /// Minimal unit used when the package ships none.
    #[must_use]
    pub fn render_unit(&self) -> String {
        let app = &self.app_name;
        format!(
            "[Unit]\n\
             Description={app} GPIO network mode switch\n\
             After=network-online.target\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             EnvironmentFile=-{defaults}\n\
             ExecStart={exec}\n\
             Restart=always\n\
             RestartSec=2\n\
             StateDirectory={app}\n\
             LogsDirectory={app}\n\
             TimeoutStopSec=10\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            defaults = self.defaults_file.display(),
            exec = self.bin_dir.join(app).display(),
        )
    }

    /// Drop-in declaring the service's state and log directories.
    #[must_use]
    pub fn render_override(&self) -> String {
        let app = &self.app_name;
        format!(
            "# Managed by netswitch-installer; rewritten on every run.\n\
             [Service]\n\
             StateDirectory={app}\n\
             LogsDirectory={app}\n"
        )
    }
}

/// Write `content` to `path`, creating parent directories.
fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Create `path` with `content` only if nothing exists there yet.
///
/// Returns whether the file was created.
fn create_if_absent(path: &Path, content: &str) -> Result<bool> {
    create_with(path, |file| file.write_all(content.as_bytes()))
}

/// Fill a temporary file next to `path`, then link it into place unless
/// `path` already exists. A failed fill leaves nothing behind.
fn create_with<F>(path: &Path, fill: F) -> Result<bool>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<()>,
{
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    fill(staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged
        .as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o644))?;

    match staged.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}
