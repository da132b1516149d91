//! Policy driver selection.
//!
//! VM descriptions still carrying the deprecated per-NIC firewall attributes
//! are handled by the legacy firewall driver; everything else goes to the
//! security group driver.

use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::document::{decode_base64, VmDocument};
use crate::error::Result;

/// Deprecated firewall attributes.
pub const FIREWALL_ATTRIBUTES: [&str; 5] = [
    "ICMP",
    "WHITE_PORTS_TCP",
    "WHITE_PORTS_UDP",
    "BLACK_PORTS_TCP",
    "BLACK_PORTS_UDP",
];

/// NICs handled by the legacy firewall driver.
pub const FIREWALL_NIC_FILTER: &str =
    "TEMPLATE/NIC[ICMP|WHITE_PORTS_TCP|WHITE_PORTS_UDP|BLACK_PORTS_TCP|BLACK_PORTS_UDP]";

/// NICs handled by the security group driver.
pub const SECURITY_GROUP_NIC_FILTER: &str = "TEMPLATE/NIC";

/// Any element under the VM root holding a deprecated firewall attribute.
const FIREWALL_MARKERS: &str =
    "//*[ICMP|WHITE_PORTS_TCP|WHITE_PORTS_UDP|BLACK_PORTS_TCP|BLACK_PORTS_UDP]";

/// Policy driver applying the NIC rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Per-NIC port white/black lists and ICMP filtering
    LegacyFirewall,
    /// Security group rules
    SecurityGroup,
}

impl DriverKind {
    /// Path selecting the NICs this driver configures.
    pub fn nic_filter(&self) -> &'static str {
        match self {
            DriverKind::LegacyFirewall => FIREWALL_NIC_FILTER,
            DriverKind::SecurityGroup => SECURITY_GROUP_NIC_FILTER,
        }
    }

    /// Name used for the driver lock file.
    pub fn lock_name(&self) -> &'static str {
        match self {
            DriverKind::LegacyFirewall => "firewall",
            DriverKind::SecurityGroup => "security_group",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lock_name())
    }
}

/// Whether the description uses the deprecated firewall attributes.
pub fn has_firewall_attributes(document: &VmDocument) -> bool {
    !document.elements(FIREWALL_MARKERS).is_empty()
}

/// Classify a parsed description.
pub fn classify(document: &VmDocument) -> DriverKind {
    let kind = if has_firewall_attributes(document) {
        DriverKind::LegacyFirewall
    } else {
        DriverKind::SecurityGroup
    };
    debug!(driver = %kind, "Selected policy driver");
    kind
}

/// Classify a serialized description.
pub fn select_driver(raw: &[u8]) -> Result<DriverKind> {
    Ok(classify(&VmDocument::parse(raw)?))
}

/// Classify a base64 encoded description.
pub fn select_driver_base64(vm_64: &str) -> Result<DriverKind> {
    select_driver(&decode_base64(vm_64)?)
}
