//! Host command execution.
//!
//! Every read of host state (kernel modules, bridges, libvirt domains, Xen
//! domains) goes through [`HostCommands`] so it can be replaced in tests.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, instrument};

use crate::error::{DriverError, Result};

/// Runs external commands and returns their standard output.
pub trait HostCommands: Send + Sync {
    /// Run `command` (a program followed by leading arguments, separated by
    /// whitespace) with `args` appended.
    fn run(&self, command: &str, args: &[&str]) -> Result<String>;
}

/// Runs commands on the local host.
///
/// The child's PATH is the inherited PATH extended with the configured search
/// directories; the driver process environment is left untouched.
#[derive(Debug, Clone)]
pub struct SystemCommands {
    path: OsString,
}

impl SystemCommands {
    /// Create a runner that appends `search_path` to the inherited PATH.
    pub fn new(search_path: &[PathBuf]) -> Self {
        let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        dirs.extend(search_path.iter().cloned());

        let path = std::env::join_paths(dirs).unwrap_or_else(|_| {
            std::env::var_os("PATH").unwrap_or_default()
        });

        Self { path }
    }

    /// PATH given to every child process.
    pub fn search_path(&self) -> &OsString {
        &self.path
    }
}

impl HostCommands for SystemCommands {
    #[instrument(skip(self))]
    fn run(&self, command: &str, args: &[&str]) -> Result<String> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| DriverError::Command("empty command line".to_string()))?;

        let output = Command::new(program)
            .args(parts)
            .args(args)
            .env("PATH", &self.path)
            .output()
            .map_err(|e| DriverError::Command(format!("{}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Command(format!(
                "{} {} exited with {}: {}",
                command,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        debug!(bytes = output.stdout.len(), "Command completed");

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
