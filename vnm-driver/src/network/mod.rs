//! Host network state used to enrich NIC records.
//!
//! This module provides:
//! - Tap device resolution per hypervisor (libvirt domain XML, Xen vif lists)
//! - Bridge topology from `brctl show`

mod bridge;
mod tap;

pub use bridge::BridgeTable;
pub use tap::{nic_flavor, GenericNic, KvmNic, NicFlavor, RuntimeInfo, XenNic};
