//! # netswitch-installer
//!
//! Installs or upgrades the netswitch GPIO network-mode daemon on a Debian
//! systemd host.
//!
//! A run resolves a GitHub release (latest stable, latest pre-release, or an
//! explicit tag), picks the `.deb` for the host architecture, downloads and
//! validates it in a private temporary directory, installs it with dpkg
//! (with one apt repair cycle), provisions the systemd unit, defaults file and
//! drop-in override, and waits for the service to become active.
//!
//! ## Example
//!
//! ```rust,ignore
//! use netswitch_installer::{GithubClient, InstallerConfig, Reconciler, SystemHost};
//! use std::time::Duration;
//!
//! let config = InstallerConfig::default();
//! let client = GithubClient::from_env(&config.api_base, Duration::from_secs(60))?;
//! let report = Reconciler::new(&config, &SystemHost, &client).run().await?;
//! println!("{report}");
//! ```

pub mod config;
pub mod deb;
pub mod error;
pub mod fetch;
pub mod host;
pub mod packages;
pub mod reconcile;
pub mod release;
pub mod service;

pub use config::{Channel, InstallerConfig};
pub use error::{Error, Result};
pub use host::{CommandOutput, Host, SystemHost};
pub use reconcile::{Reconciler, Report, Stage};
pub use release::{GithubClient, Release, ReleaseIndex, ReleaseSelector};
