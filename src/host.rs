//! Access to the target host: external commands and host probes.
//!
//! Installer components never spawn processes themselves. They describe the
//! command and hand it to a [`Host`], which lets the whole procedure run
//! against a scripted host in tests.

use crate::error::{Error, Result};
use std::process::Stdio;
use tracing::debug;

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a command that exited 0.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Output of a command that exited with `code`.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last `n` non-empty lines of stderr, for error messages.
    #[must_use]
    pub fn stderr_tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// The machine being provisioned.
#[allow(async_fn_in_trait)]
pub trait Host {
    /// Run `program` with `args` and capture its output.
    ///
    /// A non-zero exit is not an error; callers inspect [`CommandOutput`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the process could not be started.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Whether the installer runs with root privileges.
    fn is_privileged(&self) -> bool;

    /// Whether `tool` is available on `PATH`.
    fn has_tool(&self, tool: &str) -> bool;
}

/// The local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("Running: {} {}", program, args.join(" "));

        let output = tokio::process::Command::new(program)
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| Error::Command {
                program: program.to_string(),
                source,
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("{} exited with {:?}", program, result.code);
        Ok(result)
    }

    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn has_tool(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }
}
