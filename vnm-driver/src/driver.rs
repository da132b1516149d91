//! Network driver facade.
//!
//! A [`NetworkDriver`] is built once per invocation from a VM description.
//! It resolves the hypervisor, parses the description and resolves the NICs
//! the chosen policy driver is responsible for; the policy driver then walks
//! them with [`NetworkDriver::process`] while holding the driver lock.

use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::commands::{HostCommands, SystemCommands};
use crate::dispatch::{classify, DriverKind};
use crate::document::{decode_base64, VmDocument};
use crate::error::Result;
use crate::hypervisor::{self, HostProbe, HypervisorProbe, HypervisorTag};
use crate::lock::DriverLock;
use crate::network::BridgeTable;
use crate::nic::NicRecord;
use crate::settings::Settings;
use crate::vm::VmEntity;

/// Settings and host access shared by the drivers.
#[derive(Clone)]
pub struct DriverContext {
    pub settings: Settings,
    pub commands: Arc<dyn HostCommands>,
    pub probe: Arc<dyn HypervisorProbe>,
}

impl DriverContext {
    pub fn new(
        settings: Settings,
        commands: Arc<dyn HostCommands>,
        probe: Arc<dyn HypervisorProbe>,
    ) -> Self {
        Self { settings, commands, probe }
    }

    /// Context reading the local host.
    pub fn system(settings: Settings) -> Self {
        let commands: Arc<dyn HostCommands> = Arc::new(SystemCommands::new(&settings.search_path));
        let probe = Arc::new(HostProbe::new(commands.clone(), settings.commands.lsmod.clone()));
        Self::new(settings, commands, probe)
    }
}

impl fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A policy driver bound to one VM.
#[derive(Debug)]
pub struct NetworkDriver {
    kind: DriverKind,
    vm: VmEntity,
    context: DriverContext,
}

impl NetworkDriver {
    /// Build a driver of `kind` for the serialized description `raw`.
    ///
    /// `deploy_id` of `-` means the VM has not been deployed. Without
    /// `hypervisor` the host is probed.
    #[instrument(skip(raw, context))]
    pub fn new(
        kind: DriverKind,
        raw: &[u8],
        deploy_id: Option<&str>,
        hypervisor: Option<HypervisorTag>,
        context: DriverContext,
    ) -> Result<Self> {
        let hypervisor = hypervisor::resolve(hypervisor, context.probe.as_ref());
        let document = VmDocument::parse(raw)?;
        Ok(Self::from_document(kind, document, deploy_id, hypervisor, context))
    }

    /// Build a driver of `kind` for a base64 encoded description.
    pub fn from_base64(
        kind: DriverKind,
        vm_64: &str,
        deploy_id: Option<&str>,
        hypervisor: Option<HypervisorTag>,
        context: DriverContext,
    ) -> Result<Self> {
        Self::new(kind, &decode_base64(vm_64)?, deploy_id, hypervisor, context)
    }

    /// Build the driver matching the contents of a base64 encoded
    /// description: legacy firewall when it carries the deprecated firewall
    /// attributes, security groups otherwise.
    #[instrument(skip(vm_64, context))]
    pub fn filter_driver(
        vm_64: &str,
        deploy_id: Option<&str>,
        hypervisor: Option<HypervisorTag>,
        context: DriverContext,
    ) -> Result<Self> {
        let raw = decode_base64(vm_64)?;
        let document = VmDocument::parse(&raw)?;
        let kind = classify(&document);
        let hypervisor = hypervisor::resolve(hypervisor, context.probe.as_ref());
        Ok(Self::from_document(kind, document, deploy_id, hypervisor, context))
    }

    fn from_document(
        kind: DriverKind,
        document: VmDocument,
        deploy_id: Option<&str>,
        hypervisor: HypervisorTag,
        context: DriverContext,
    ) -> Self {
        let vm = VmEntity::new(
            document,
            kind.nic_filter(),
            deploy_id,
            hypervisor,
            context.commands.as_ref(),
            &context.settings.commands,
        );

        info!(driver = %kind, hypervisor = %hypervisor, nics = vm.nics().len(), "Network driver ready");

        Self { kind, vm, context }
    }

    /// Call `visitor` once per NIC, in document order.
    pub fn process<'a, F: FnMut(&'a NicRecord)>(&'a self, visitor: F) {
        self.vm.each_nic(visitor);
    }

    /// Text of the first element matching `path` under the VM root.
    pub fn field(&self, path: &str) -> Option<String> {
        self.vm.field(path)
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn hypervisor(&self) -> HypervisorTag {
        self.vm.hypervisor()
    }

    pub fn vm(&self) -> &VmEntity {
        &self.vm
    }

    pub fn nics(&self) -> &[NicRecord] {
        self.vm.nics()
    }

    pub fn settings(&self) -> &Settings {
        &self.context.settings
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Take the driver lock when locking is enabled.
    ///
    /// Returns `None` when locking is disabled. The lock is released when the
    /// returned guard is dropped or passed to [`NetworkDriver::release_lock`].
    pub fn acquire_lock(&self) -> Result<Option<DriverLock>> {
        if !self.context.settings.locking {
            return Ok(None);
        }
        DriverLock::acquire(&self.context.settings.lock_dir, self.kind.lock_name()).map(Some)
    }

    /// Release a lock taken with [`NetworkDriver::acquire_lock`].
    pub fn release_lock(&self, lock: Option<DriverLock>) {
        drop(lock);
    }

    /// Run `f` while holding the driver lock. The lock is released however
    /// `f` returns, including on error or panic.
    pub fn with_lock<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<crate::error::DriverError>,
    {
        let _lock = self.acquire_lock()?;
        f(self)
    }

    // =========================================================================
    // Host topology
    // =========================================================================

    /// Bridges on the host and their interfaces. Empty if the listing fails.
    pub fn interfaces(&self) -> BridgeTable {
        BridgeTable::load(self.context.commands.as_ref(), &self.context.settings.commands.brctl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::mock::{MockCommands, MockProbe};

    const VM: &str = r#"<VM>
  <NAME>db</NAME>
  <TEMPLATE>
    <NIC><BRIDGE>br0</BRIDGE><MAC>02:00:00:00:00:01</MAC></NIC>
    <NIC><BRIDGE>br1</BRIDGE><MAC>02:00:00:00:00:02</MAC><ICMP>drop</ICMP></NIC>
  </TEMPLATE>
</VM>"#;

    fn context(settings: Settings) -> DriverContext {
        DriverContext::new(settings, Arc::new(MockCommands::new()), Arc::new(MockProbe::empty()))
    }

    fn bridges(driver: &NetworkDriver) -> Vec<String> {
        let mut seen = Vec::new();
        driver.process(|nic| seen.push(nic.bridge().unwrap_or_default().to_string()));
        seen
    }

    #[test]
    fn test_kind_selects_nics() {
        let sg = NetworkDriver::new(
            DriverKind::SecurityGroup, VM.as_bytes(), None, None, context(Settings::default()),
        )
        .unwrap();
        assert_eq!(bridges(&sg), vec!["br0", "br1"]);

        let fw = NetworkDriver::new(
            DriverKind::LegacyFirewall, VM.as_bytes(), None, None, context(Settings::default()),
        )
        .unwrap();
        assert_eq!(bridges(&fw), vec!["br1"]);
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let result = NetworkDriver::new(
            DriverKind::SecurityGroup, b"<VM><NAME></VM>", None, None, context(Settings::default()),
        );
        assert!(matches!(result, Err(DriverError::Parse(_))));
    }

    #[test]
    fn test_field_and_hypervisor() {
        let driver = NetworkDriver::new(
            DriverKind::SecurityGroup,
            VM.as_bytes(),
            Some("-"),
            Some(HypervisorTag::Xen),
            context(Settings::default()),
        )
        .unwrap();

        assert_eq!(driver.field("NAME").as_deref(), Some("db"));
        assert_eq!(driver.field("TEMPLATE/NIC/BRIDGE").as_deref(), Some("br0"));
        assert_eq!(driver.hypervisor(), HypervisorTag::Xen);
        assert_eq!(driver.vm().deploy_id(), None);
        assert_eq!(driver.settings().start_vlan, 2);
    }

    #[test]
    fn test_lock_disabled_is_noop() {
        let driver = NetworkDriver::new(
            DriverKind::SecurityGroup, VM.as_bytes(), None, None, context(Settings::default()),
        )
        .unwrap();

        let lock = driver.acquire_lock().unwrap();
        assert!(lock.is_none());
        driver.release_lock(lock);
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            locking: true,
            lock_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let driver = NetworkDriver::new(
            DriverKind::LegacyFirewall, VM.as_bytes(), None, None, context(settings),
        )
        .unwrap();

        let result: std::result::Result<(), DriverError> = driver.with_lock(|d| {
            assert!(dir.path().join("vnm-firewall-lock").exists());
            assert_eq!(d.nics().len(), 1);
            Err(DriverError::Command("ebtables failed".to_string()))
        });
        assert!(result.is_err());

        // Released: taking it again does not block
        let lock = driver.acquire_lock().unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn test_with_lock_releases_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            locking: true,
            lock_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let driver = NetworkDriver::new(
            DriverKind::SecurityGroup, VM.as_bytes(), None, None, context(settings),
        )
        .unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            driver.with_lock(|_| -> std::result::Result<(), DriverError> {
                panic!("rule application blew up")
            })
        }));
        assert!(outcome.is_err());

        let lock = driver.acquire_lock().unwrap();
        assert!(lock.is_some());
        driver.release_lock(lock);
    }

    #[test]
    fn test_unwritable_lock_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            locking: true,
            lock_dir: dir.path().join("missing"),
            ..Settings::default()
        };
        let driver = NetworkDriver::new(
            DriverKind::SecurityGroup, VM.as_bytes(), None, None, context(settings),
        )
        .unwrap();

        let result = driver.with_lock(|_| Ok::<_, DriverError>(()));
        assert!(matches!(result, Err(DriverError::LockFailed(_))));
    }

    #[test]
    fn test_interfaces_degrade_to_empty() {
        let driver = NetworkDriver::new(
            DriverKind::SecurityGroup, VM.as_bytes(), None, None, context(Settings::default()),
        )
        .unwrap();
        assert!(driver.interfaces().is_empty());
    }
}
