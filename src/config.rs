//! Configuration for netswitch-installer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Release channel to install from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Stable releases only.
    #[default]
    Stable,
    /// Pre-releases only.
    Pre,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => f.write_str("stable"),
            Self::Pre => f.write_str("pre"),
        }
    }
}

/// Installer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Application name; prefixes asset names and names the unit.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// GitHub repository in `owner/name` form.
    #[serde(default = "default_repo")]
    pub repo: String,

    /// Installed package name used for version lookups (defaults to `app_name`).
    #[serde(default)]
    pub package_name: Option<String>,

    /// Debian architecture the package targets.
    #[serde(default = "default_arch")]
    pub arch: String,

    /// Release channel when no tag is given.
    #[serde(default)]
    pub channel: Channel,

    /// Explicit release tag; overrides the channel.
    #[serde(default)]
    pub tag: Option<String>,

    /// Base URL of the release API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Download behaviour.
    #[serde(default)]
    pub download: DownloadConfig,

    /// Service activation check.
    #[serde(default)]
    pub activation: ActivationConfig,

    /// Runtime dependencies installed before the package.
    #[serde(default = "default_dependencies")]
    pub dependencies: Vec<DependencySpec>,

    /// Values written to a freshly created defaults file.
    #[serde(default)]
    pub defaults: GpioDefaults,
}

/// Filesystem locations on the target host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding system unit files.
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    /// Environment defaults file (defaults to `/etc/default/<app>`).
    #[serde(default)]
    pub defaults_file: Option<PathBuf>,

    /// Directory the package installs its executable into.
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,
}

/// Artifact download configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Total attempts per download.
    #[serde(default = "default_attempts")]
    pub attempts: usize,

    /// Fixed delay between attempts in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Activation check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Total time to wait for the unit to become active.
    #[serde(default = "default_activation_timeout")]
    pub timeout_secs: u64,

    /// Delay between `is-active` probes in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Journal lines dumped on timeout.
    #[serde(default = "default_log_lines")]
    pub log_lines: u32,
}

/// A runtime dependency with an optional alternative package name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Preferred package name.
    pub primary: String,
    /// Package tried when the primary has no install candidate.
    #[serde(default)]
    pub fallback: Option<String>,
}

impl DependencySpec {
    /// Candidate names in priority order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallback.as_deref())
    }
}

/// GPIO and network-mode settings seeded into the defaults file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioDefaults {
    /// GPIO character device.
    #[serde(default = "default_chip")]
    pub chip: String,
    /// LED line offset.
    #[serde(default = "default_led_line")]
    pub led_line: u32,
    /// Button line offset.
    #[serde(default = "default_button_line")]
    pub button_line: u32,
    /// LED is active-low.
    #[serde(default)]
    pub led_active_low: bool,
    /// Button is active-low.
    #[serde(default = "default_true")]
    pub button_active_low: bool,
    /// Minimum time to stay in DHCP mode, in seconds.
    #[serde(default = "default_hold_secs")]
    pub min_dhcp_hold_secs: u64,
    /// Minimum time to stay on the default static IP, in seconds.
    #[serde(default = "default_hold_secs")]
    pub min_default_ip_hold_secs: u64,
    /// Static address in CIDR notation.
    #[serde(default = "default_static_ip")]
    pub default_static_ip: String,
    /// Switch modes on button level instead of presses.
    #[serde(default)]
    pub hard_switch: bool,
}

impl GpioDefaults {
    /// Render as an `EnvironmentFile` body.
    #[must_use]
    pub fn render(&self, app_name: &str) -> String {
        let flag = |b: bool| if b { "1" } else { "0" };
        format!(
            "# Defaults for {app_name}. Created by netswitch-installer; edits are preserved.\n\
             NETSWITCH_GPIO_CHIP={}\n\
             NETSWITCH_LED_LINE={}\n\
             NETSWITCH_BUTTON_LINE={}\n\
             NETSWITCH_LED_ACTIVE_LOW={}\n\
             NETSWITCH_BUTTON_ACTIVE_LOW={}\n\
             NETSWITCH_MIN_DHCP_HOLD_SECS={}\n\
             NETSWITCH_MIN_DEFAULT_IP_HOLD_SECS={}\n\
             NETSWITCH_DEFAULT_STATIC_IP={}\n\
             NETSWITCH_HARD_SWITCH={}\n",
            self.chip,
            self.led_line,
            self.button_line,
            flag(self.led_active_low),
            flag(self.button_active_low),
            self.min_dhcp_hold_secs,
            self.min_default_ip_hold_secs,
            self.default_static_ip,
            flag(self.hard_switch),
        )
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            repo: default_repo(),
            package_name: None,
            arch: default_arch(),
            channel: Channel::default(),
            tag: None,
            api_base: default_api_base(),
            paths: PathsConfig::default(),
            download: DownloadConfig::default(),
            activation: ActivationConfig::default(),
            dependencies: default_dependencies(),
            defaults: GpioDefaults::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            unit_dir: default_unit_dir(),
            defaults_file: None,
            bin_dir: default_bin_dir(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_activation_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            log_lines: default_log_lines(),
        }
    }
}

impl Default for GpioDefaults {
    fn default() -> Self {
        Self {
            chip: default_chip(),
            led_line: default_led_line(),
            button_line: default_button_line(),
            led_active_low: false,
            button_active_low: true,
            min_dhcp_hold_secs: default_hold_secs(),
            min_default_ip_hold_secs: default_hold_secs(),
            default_static_ip: default_static_ip(),
            hard_switch: false,
        }
    }
}

fn default_app_name() -> String {
    "netswitch".to_string()
}

fn default_repo() -> String {
    "netswitch/netswitch".to_string()
}

fn default_arch() -> String {
    "arm64".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/bin")
}

const fn default_attempts() -> usize {
    3
}

const fn default_backoff_ms() -> u64 {
    2000
}

const fn default_timeout_secs() -> u64 {
    120
}

const fn default_activation_timeout() -> u64 {
    15
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_log_lines() -> u32 {
    50
}

fn default_dependencies() -> Vec<DependencySpec> {
    vec![
        DependencySpec {
            primary: "python3".to_string(),
            fallback: None,
        },
        DependencySpec {
            primary: "python3-libgpiod".to_string(),
            fallback: Some("python3-gpiod".to_string()),
        },
    ]
}

fn default_chip() -> String {
    "/dev/gpiochip0".to_string()
}

const fn default_led_line() -> u32 {
    17
}

const fn default_button_line() -> u32 {
    27
}

const fn default_true() -> bool {
    true
}

const fn default_hold_secs() -> u64 {
    30
}

fn default_static_ip() -> String {
    "192.168.50.1/24".to_string()
}

impl InstallerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default location of the optional config file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "netswitch-installer")
            .map(|dirs| dirs.config_dir().join("installer.toml"))
    }

    /// Package name used with dpkg.
    #[must_use]
    pub fn package_name(&self) -> &str {
        self.package_name.as_deref().unwrap_or(&self.app_name)
    }

    /// systemd unit name.
    #[must_use]
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.app_name)
    }

    /// Path of the environment defaults file.
    #[must_use]
    pub fn defaults_file(&self) -> PathBuf {
        self.paths
            .defaults_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("/etc/default").join(&self.app_name))
    }

    /// Total activation wait.
    #[must_use]
    pub fn activation_timeout(&self) -> Duration {
        Duration::from_secs(self.activation.timeout_secs)
    }

    /// Delay between activation probes.
    #[must_use]
    pub fn activation_interval(&self) -> Duration {
        Duration::from_millis(self.activation.poll_interval_ms)
    }
}
