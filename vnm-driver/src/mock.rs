//! Mock host for testing and development.
//!
//! [`MockCommands`] answers command lines from a canned table and records
//! every invocation; [`MockProbe`] reports a fixed hypervisor state. Neither
//! touches the real host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::commands::HostCommands;
use crate::error::{DriverError, Result};
use crate::hypervisor::HypervisorProbe;

/// Canned command outputs keyed by the full command line.
#[derive(Default)]
pub struct MockCommands {
    outputs: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MockCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command_line` (command and arguments joined by single spaces)
    /// with `output`.
    pub fn with_output(mut self, command_line: &str, output: &str) -> Self {
        self.outputs.insert(command_line.to_string(), output.to_string());
        self
    }

    /// Command lines run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl HostCommands for MockCommands {
    fn run(&self, command: &str, args: &[&str]) -> Result<String> {
        let line = command
            .split_whitespace()
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");

        debug!(command = %line, "Mock command");

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }

        self.outputs
            .get(&line)
            .cloned()
            .ok_or_else(|| DriverError::Command(format!("{}: not found", line)))
    }
}

/// Hypervisor probe with fixed answers.
pub struct MockProbe {
    xen: bool,
    modules: Option<String>,
    calls: AtomicUsize,
}

impl MockProbe {
    /// `modules` of `None` makes the module listing fail.
    pub fn new(xen: bool, modules: Option<&str>) -> Self {
        Self {
            xen,
            modules: modules.map(str::to_string),
            calls: AtomicUsize::new(0),
        }
    }

    /// Probe that detects nothing.
    pub fn empty() -> Self {
        Self::new(false, Some(""))
    }

    /// Number of probe reads performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HypervisorProbe for MockProbe {
    fn xen_capabilities_present(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.xen
    }

    fn kernel_modules(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.modules
            .clone()
            .ok_or_else(|| DriverError::Probe("lsmod failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_commands_record_calls() {
        let commands = MockCommands::new().with_output("sudo brctl show", "bridge name\n");

        assert_eq!(commands.run("sudo  brctl", &["show"]).unwrap(), "bridge name\n");
        assert!(commands.run("virsh", &["dumpxml", "one-1"]).is_err());
        assert_eq!(
            commands.calls(),
            vec!["sudo brctl show".to_string(), "virsh dumpxml one-1".to_string()]
        );
    }
}
