//! Tap device resolution.
//!
//! Each hypervisor names the host side of a VM NIC differently:
//! - KVM: libvirt picks the name, read back from `virsh dumpxml` as the
//!   `<target dev=.../>` of the bridged interface with the NIC's MAC
//! - Xen: `vif<domid>.<index>`, the index coming from `network-list`
//!
//! Runtime information is fetched once per VM and shared by all its NICs.

use tracing::{debug, warn};

use crate::commands::HostCommands;
use crate::document::VmDocument;
use crate::hypervisor::HypervisorTag;
use crate::nic::{keys, NicRecord};
use crate::settings::CommandTable;

/// Hypervisor state of one VM, shared by all of its NICs.
#[derive(Debug, Clone, Default)]
pub struct RuntimeInfo {
    loaded: bool,
    /// libvirt domain description (KVM)
    pub domain: Option<VmDocument>,
    /// Xen domain id
    pub domid: Option<String>,
    /// Xen `network-list` output
    pub networks: Option<String>,
}

impl RuntimeInfo {
    /// Whether a fetch has already been attempted.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Hypervisor-specific NIC handling.
pub trait NicFlavor: Send + Sync {
    /// Hypervisor this flavor handles.
    fn hypervisor(&self) -> HypervisorTag;

    /// Empty record for a new NIC of this hypervisor.
    fn new_nic(&self) -> NicRecord {
        NicRecord::new()
    }

    /// Fetch the runtime information of the VM `deploy_id` into `info`.
    fn load_info(
        &self,
        deploy_id: &str,
        info: &mut RuntimeInfo,
        commands: &dyn HostCommands,
        table: &CommandTable,
    );

    /// Set the `tap` entry of `nic` from `info`, replacing any existing value.
    fn resolve_tap(&self, nic: &mut NicRecord, info: &RuntimeInfo);

    /// Load runtime information unless already loaded, then resolve the tap.
    fn enrich(
        &self,
        nic: &mut NicRecord,
        deploy_id: Option<&str>,
        info: &mut RuntimeInfo,
        commands: &dyn HostCommands,
        table: &CommandTable,
    ) {
        if let Some(deploy_id) = deploy_id {
            if !info.loaded {
                self.load_info(deploy_id, info, commands, table);
                info.loaded = true;
            }
        }
        self.resolve_tap(nic, info);
    }
}

/// Flavor for `hypervisor`.
pub fn nic_flavor(hypervisor: HypervisorTag) -> Box<dyn NicFlavor> {
    match hypervisor {
        HypervisorTag::Kvm => Box::new(KvmNic),
        HypervisorTag::Xen => Box::new(XenNic),
        HypervisorTag::Unknown => Box::new(GenericNic),
    }
}

/// Run a command; empty or failed output counts as absent.
fn read(commands: &dyn HostCommands, command: &str, args: &[&str]) -> Option<String> {
    match commands.run(command, args) {
        Ok(output) if output.trim().is_empty() => None,
        Ok(output) => Some(output),
        Err(e) => {
            warn!(error = %e, "Failed to read hypervisor runtime info");
            None
        }
    }
}

// =============================================================================
// KVM
// =============================================================================

/// NICs of libvirt/KVM domains.
pub struct KvmNic;

impl NicFlavor for KvmNic {
    fn hypervisor(&self) -> HypervisorTag {
        HypervisorTag::Kvm
    }

    fn load_info(
        &self,
        deploy_id: &str,
        info: &mut RuntimeInfo,
        commands: &dyn HostCommands,
        table: &CommandTable,
    ) {
        let Some(xml) = read(commands, &table.virsh, &["dumpxml", deploy_id]) else {
            return;
        };

        match VmDocument::parse(xml.as_bytes()) {
            Ok(domain) => info.domain = Some(domain),
            Err(e) => warn!(deploy_id = %deploy_id, error = %e, "Unreadable libvirt domain XML"),
        }
    }

    fn resolve_tap(&self, nic: &mut NicRecord, info: &RuntimeInfo) {
        let (Some(domain), Some(mac)) = (&info.domain, nic.mac()) else {
            return;
        };

        let tap = domain
            .elements("devices/interface[@type='bridge']")
            .into_iter()
            .find(|iface| {
                iface
                    .select("mac")
                    .iter()
                    .any(|m| m.attribute("address").is_some_and(|a| a.eq_ignore_ascii_case(mac)))
            })
            .and_then(|iface| iface.first("target"))
            .and_then(|target| target.attribute("dev"))
            .map(str::to_string);

        match tap {
            Some(tap) => {
                debug!(mac = %mac, tap = %tap, "Resolved KVM tap device");
                nic.set(keys::TAP, tap);
            }
            None => debug!(mac = %mac, "No bridged libvirt interface for NIC"),
        }
    }
}

// =============================================================================
// Xen
// =============================================================================

/// NICs of Xen domains.
pub struct XenNic;

impl NicFlavor for XenNic {
    fn hypervisor(&self) -> HypervisorTag {
        HypervisorTag::Xen
    }

    fn load_info(
        &self,
        deploy_id: &str,
        info: &mut RuntimeInfo,
        commands: &dyn HostCommands,
        table: &CommandTable,
    ) {
        info.domid = read(commands, &table.xen, &["domid", deploy_id])
            .map(|domid| domid.trim().to_string());
        info.networks = read(commands, &table.xen, &["network-list", deploy_id]);
    }

    /// `network-list` rows look like `Idx BE Mac-Addr. handle state ...`
    /// after a header line.
    fn resolve_tap(&self, nic: &mut NicRecord, info: &RuntimeInfo) {
        let (Some(domid), Some(networks), Some(mac)) =
            (&info.domid, &info.networks, nic.mac())
        else {
            return;
        };

        let index = networks.lines().skip(1).find_map(|row| {
            let columns: Vec<&str> = row.split_whitespace().collect();
            match columns.as_slice() {
                [idx, _, row_mac, ..] if *row_mac == mac => Some(idx.to_string()),
                _ => None,
            }
        });

        match index {
            Some(index) => {
                let tap = format!("vif{}.{}", domid, index);
                debug!(mac = %mac, tap = %tap, "Resolved Xen vif");
                nic.set(keys::TAP, tap);
            }
            None => debug!(mac = %mac, "NIC not in Xen network list"),
        }
    }
}

// =============================================================================
// Other hypervisors
// =============================================================================

/// NICs of hypervisors without tap resolution.
pub struct GenericNic;

impl NicFlavor for GenericNic {
    fn hypervisor(&self) -> HypervisorTag {
        HypervisorTag::Unknown
    }

    fn load_info(
        &self,
        _deploy_id: &str,
        _info: &mut RuntimeInfo,
        _commands: &dyn HostCommands,
        _table: &CommandTable,
    ) {
    }

    fn resolve_tap(&self, _nic: &mut NicRecord, _info: &RuntimeInfo) {}
}
