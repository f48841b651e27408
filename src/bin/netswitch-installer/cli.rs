//! Command-line interface definition.

use clap::Parser;
use netswitch_installer::{Channel, InstallerConfig};
use std::path::PathBuf;

/// Install or upgrade netswitch from its GitHub releases.
#[derive(Parser, Debug)]
#[command(name = "netswitch-installer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Install the latest pre-release.
    #[arg(long, overrides_with = "stable")]
    pub pre: bool,

    /// Install the latest stable release (default).
    #[arg(long, overrides_with = "pre")]
    pub stable: bool,

    /// Install this release tag; overrides --pre/--stable.
    #[arg(long, env = "TAG")]
    pub tag: Option<String>,

    /// GitHub repository to install from (owner/name).
    #[arg(long, env = "REPO")]
    pub repo: Option<String>,

    /// Installed package name used for version lookups.
    #[arg(long = "package", env = "DPKG_PKG")]
    pub package: Option<String>,

    /// Debian architecture the package targets.
    #[arg(long)]
    pub arch: Option<String>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Channel requested on the command line, if any.
    pub fn channel(&self) -> Option<Channel> {
        if self.pre {
            Some(Channel::Pre)
        } else if self.stable {
            Some(Channel::Stable)
        } else {
            None
        }
    }

    /// Convert CLI arguments into an `InstallerConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<InstallerConfig> {
        // Explicit file, then the default location if present, then defaults
        let mut config = match self.config {
            Some(ref path) => InstallerConfig::from_file(path)?,
            None => match InstallerConfig::default_path().filter(|p| p.is_file()) {
                Some(path) => InstallerConfig::from_file(&path)?,
                None => InstallerConfig::default(),
            },
        };

        if let Some(channel) = self.channel() {
            config.channel = channel;
        }
        if let Some(tag) = self.tag.filter(|t| !t.trim().is_empty()) {
            config.tag = Some(tag);
        }
        if let Some(repo) = self.repo {
            config.repo = repo;
        }
        if let Some(package) = self.package {
            config.package_name = Some(package);
        }
        if let Some(arch) = self.arch {
            config.arch = arch;
        }

        Ok(config)
    }
}
