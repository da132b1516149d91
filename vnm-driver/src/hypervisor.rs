//! Hypervisor detection.
//!
//! The hypervisor decides how a NIC's tap device is found. Callers usually
//! know it; when they don't, it is probed from host state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::commands::HostCommands;
use crate::error::Result;

/// File present on Xen dom0 hosts.
pub const XEN_CAPABILITIES_PATH: &str = "/proc/xen/capabilities";

/// Hypervisor running the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorTag {
    Xen,
    Kvm,
    #[default]
    Unknown,
}

impl HypervisorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            HypervisorTag::Xen => "xen",
            HypervisorTag::Kvm => "kvm",
            HypervisorTag::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HypervisorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for HypervisorTag {
    /// Any name other than `kvm` or `xen` maps to `Unknown`.
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "kvm" => HypervisorTag::Kvm,
            "xen" => HypervisorTag::Xen,
            _ => HypervisorTag::Unknown,
        }
    }
}

/// Source of the host state used to detect the hypervisor.
pub trait HypervisorProbe: Send + Sync {
    /// Whether the Xen capabilities marker exists.
    fn xen_capabilities_present(&self) -> bool;

    /// Listing of the loaded kernel modules.
    fn kernel_modules(&self) -> Result<String>;
}

/// Probe reading the local host.
pub struct HostProbe {
    commands: Arc<dyn HostCommands>,
    lsmod: String,
    xen_marker: PathBuf,
}

impl HostProbe {
    /// Create a probe that lists modules with `lsmod` (a command line).
    pub fn new(commands: Arc<dyn HostCommands>, lsmod: impl Into<String>) -> Self {
        Self {
            commands,
            lsmod: lsmod.into(),
            xen_marker: PathBuf::from(XEN_CAPABILITIES_PATH),
        }
    }

    /// Use a different Xen marker file.
    pub fn with_xen_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.xen_marker = path.into();
        self
    }
}

impl HypervisorProbe for HostProbe {
    fn xen_capabilities_present(&self) -> bool {
        self.xen_marker.exists()
    }

    fn kernel_modules(&self) -> Result<String> {
        self.commands.run(&self.lsmod, &[])
    }
}

/// Pick the hypervisor: `explicit` wins, otherwise probe the host.
pub fn resolve(explicit: Option<HypervisorTag>, probe: &dyn HypervisorProbe) -> HypervisorTag {
    match explicit {
        Some(tag) => {
            debug!(hypervisor = %tag, "Using hypervisor given by caller");
            tag
        }
        None => detect(probe),
    }
}

/// Probe the host for the running hypervisor.
///
/// Probe failures are logged and yield [`HypervisorTag::Unknown`].
#[instrument(skip(probe))]
pub fn detect(probe: &dyn HypervisorProbe) -> HypervisorTag {
    if probe.xen_capabilities_present() {
        debug!("Xen capabilities marker found");
        return HypervisorTag::Xen;
    }

    match probe.kernel_modules() {
        Ok(modules) if modules.contains("kvm") => {
            debug!("kvm kernel module loaded");
            HypervisorTag::Kvm
        }
        Ok(_) => {
            debug!("No known hypervisor detected");
            HypervisorTag::Unknown
        }
        Err(e) => {
            warn!(error = %e, "Failed to list kernel modules, hypervisor unknown");
            HypervisorTag::Unknown
        }
    }
}
