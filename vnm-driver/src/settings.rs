//! Driver settings.
//!
//! Settings are read from a YAML file. The file is optional: when it is
//! missing or unreadable every value falls back to its default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{DriverError, Result};

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/vnm/network.yaml";

/// Driver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// First VLAN id handed out to networks without an explicit one
    pub start_vlan: u16,
    /// Serialize driver runs on this host with an advisory file lock
    pub locking: bool,
    /// Directory holding the lock files
    pub lock_dir: PathBuf,
    /// Directories appended to PATH for every external command
    pub search_path: Vec<PathBuf>,
    /// External commands used to read host state
    pub commands: CommandTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_vlan: 2,
            locking: false,
            lock_dir: PathBuf::from("/tmp"),
            search_path: vec![
                PathBuf::from("/bin"),
                PathBuf::from("/sbin"),
                PathBuf::from("/usr/bin"),
            ],
            commands: CommandTable::default(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            DriverError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            DriverError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load settings from a YAML file, falling back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "No settings file found, using defaults");
            return Self::default();
        }

        match Self::load(path) {
            Ok(settings) => {
                info!(path = %path.display(), "Settings loaded");
                settings
            }
            Err(e) => {
                warn!(error = %e, "Ignoring settings file, using defaults");
                Self::default()
            }
        }
    }
}

/// Command lines (program plus leading arguments) for host-state reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTable {
    /// libvirt client, used for `dumpxml`
    pub virsh: String,
    /// Xen toolstack (`xl` or `xm`), used for `domid` and `network-list`
    pub xen: String,
    /// Bridge listing
    pub brctl: String,
    /// Kernel module listing
    pub lsmod: String,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self {
            virsh: "virsh -c qemu:///system".to_string(),
            xen: "sudo xl".to_string(),
            brctl: "sudo brctl".to_string(),
            lsmod: "lsmod".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.start_vlan, 2);
        assert!(!settings.locking);
        assert_eq!(settings.lock_dir, PathBuf::from("/tmp"));
        assert_eq!(settings.commands.lsmod, "lsmod");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings: Settings = serde_yaml::from_str(
            "start_vlan: 100\ncommands:\n  xen: sudo xm\n",
        )
        .unwrap();

        assert_eq!(settings.start_vlan, 100);
        assert!(!settings.locking);
        assert_eq!(settings.commands.xen, "sudo xm");
        assert_eq!(settings.commands.virsh, "virsh -c qemu:///system");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(dir.path().join("absent.yaml"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "start_vlan: [not, a, number]").unwrap();

        assert!(matches!(Settings::load(file.path()), Err(DriverError::Config(_))));
        assert_eq!(Settings::load_or_default(file.path()), Settings::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "locking: true\nlock_dir: /run/vnm").unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert!(settings.locking);
        assert_eq!(settings.lock_dir, PathBuf::from("/run/vnm"));
        assert_eq!(settings.start_vlan, 2);
    }
}
