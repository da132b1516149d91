//! VM entity and NIC collection.

use tracing::{debug, info, instrument};

use crate::commands::HostCommands;
use crate::document::VmDocument;
use crate::hypervisor::HypervisorTag;
use crate::network::{nic_flavor, RuntimeInfo};
use crate::nic::NicRecord;
use crate::settings::CommandTable;

/// Deploy id passed by callers for VMs that were never deployed.
pub const DEPLOY_ID_PLACEHOLDER: &str = "-";

/// Treat the `-` placeholder as no deploy id.
pub fn normalize_deploy_id(deploy_id: Option<&str>) -> Option<String> {
    deploy_id
        .filter(|id| *id != DEPLOY_ID_PLACEHOLDER)
        .map(str::to_string)
}

/// One VM and the NICs resolved from its description.
#[derive(Debug)]
pub struct VmEntity {
    document: VmDocument,
    nic_filter: String,
    deploy_id: Option<String>,
    hypervisor: HypervisorTag,
    runtime: RuntimeInfo,
    nics: Vec<NicRecord>,
}

impl VmEntity {
    /// Build the VM and one enriched record per element matching `nic_filter`.
    #[instrument(skip(document, commands, table), fields(vm = ?document.field("NAME")))]
    pub fn new(
        document: VmDocument,
        nic_filter: &str,
        deploy_id: Option<&str>,
        hypervisor: HypervisorTag,
        commands: &dyn HostCommands,
        table: &CommandTable,
    ) -> Self {
        let mut vm = Self {
            document,
            nic_filter: nic_filter.to_string(),
            deploy_id: normalize_deploy_id(deploy_id),
            hypervisor,
            runtime: RuntimeInfo::default(),
            nics: Vec::new(),
        };
        vm.build_nics(commands, table);

        info!(
            nics = vm.nics.len(),
            hypervisor = %vm.hypervisor,
            deploy_id = ?vm.deploy_id,
            "Resolved VM NICs"
        );

        vm
    }

    fn build_nics(&mut self, commands: &dyn HostCommands, table: &CommandTable) {
        let flavor = nic_flavor(self.hypervisor);
        let lookup_id = self.lookup_deploy_id();

        let mut nics = Vec::new();
        for element in self.document.elements(&self.nic_filter) {
            let mut nic = flavor.new_nic();
            nic.fold_element(element);
            flavor.enrich(&mut nic, lookup_id.as_deref(), &mut self.runtime, commands, table);

            debug!(mac = ?nic.mac(), bridge = ?nic.bridge(), tap = ?nic.tap(), "NIC resolved");
            nics.push(nic);
        }

        self.nics = nics;
    }

    /// Deploy id used to query the hypervisor: the one given by the caller,
    /// else the one recorded in the description.
    fn lookup_deploy_id(&self) -> Option<String> {
        self.deploy_id
            .clone()
            .or_else(|| normalize_deploy_id(self.document.field("DEPLOY_ID").as_deref()))
    }

    /// Visit every NIC in document order.
    pub fn each_nic<'a, F: FnMut(&'a NicRecord)>(&'a self, mut visitor: F) {
        for nic in &self.nics {
            visitor(nic);
        }
    }

    pub fn nics(&self) -> &[NicRecord] {
        &self.nics
    }

    /// Deploy id given by the caller, if any.
    pub fn deploy_id(&self) -> Option<&str> {
        self.deploy_id.as_deref()
    }

    pub fn hypervisor(&self) -> HypervisorTag {
        self.hypervisor
    }

    pub fn nic_filter(&self) -> &str {
        &self.nic_filter
    }

    pub fn document(&self) -> &VmDocument {
        &self.document
    }

    /// Text of the first element matching `path` under the VM root.
    pub fn field(&self, path: &str) -> Option<String> {
        self.document.field(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCommands;

    const VM: &str = r#"<VM>
  <NAME>web</NAME>
  <DEPLOY_ID>one-12</DEPLOY_ID>
  <TEMPLATE>
    <NIC><BRIDGE>br0</BRIDGE><MAC>02:00:00:00:00:01</MAC></NIC>
    <NIC><BRIDGE>br1</BRIDGE><MAC>02:00:00:00:00:02</MAC></NIC>
    <NIC><BRIDGE>br2</BRIDGE><MAC>02:00:00:00:00:03</MAC></NIC>
  </TEMPLATE>
</VM>"#;

    fn build(deploy_id: Option<&str>, hypervisor: HypervisorTag, commands: &MockCommands) -> VmEntity {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        VmEntity::new(doc, "TEMPLATE/NIC", deploy_id, hypervisor, commands, &CommandTable::default())
    }

    #[test]
    fn test_normalize_deploy_id() {
        assert_eq!(normalize_deploy_id(Some("-")), None);
        assert_eq!(normalize_deploy_id(None), None);
        assert_eq!(normalize_deploy_id(Some("one-3")), Some("one-3".to_string()));
        assert_eq!(normalize_deploy_id(Some("")), Some(String::new()));
        assert_eq!(normalize_deploy_id(Some("--")), Some("--".to_string()));
    }

    #[test]
    fn test_one_record_per_match_in_order() {
        let vm = build(Some("one-12"), HypervisorTag::Unknown, &MockCommands::new());

        let bridges: Vec<_> = vm.nics().iter().map(|n| n.bridge().unwrap()).collect();
        assert_eq!(bridges, vec!["br0", "br1", "br2"]);
        assert_eq!(vm.deploy_id(), Some("one-12"));
        assert_eq!(vm.field("NAME").as_deref(), Some("web"));
    }

    #[test]
    fn test_placeholder_deploy_id_is_absent() {
        let vm = build(Some("-"), HypervisorTag::Unknown, &MockCommands::new());
        assert_eq!(vm.deploy_id(), None);
    }

    #[test]
    fn test_lookup_falls_back_to_document_deploy_id() {
        let commands = MockCommands::new();
        let vm = build(Some("-"), HypervisorTag::Kvm, &commands);

        assert_eq!(vm.deploy_id(), None);
        assert_eq!(commands.calls(), vec!["virsh -c qemu:///system dumpxml one-12".to_string()]);
    }

    #[test]
    fn test_no_matches_is_empty() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        let vm = VmEntity::new(
            doc,
            "TEMPLATE/DISK",
            None,
            HypervisorTag::Unknown,
            &MockCommands::new(),
            &CommandTable::default(),
        );

        let mut visited = 0;
        vm.each_nic(|_| visited += 1);
        assert_eq!(visited, 0);
    }
}
