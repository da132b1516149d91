//! # vnm Driver
//!
//! NIC resolution and policy-driver dispatch for VM network configuration.
//!
//! Given a VM description (XML, usually base64 encoded) this crate:
//! - parses it into an immutable document queried by path
//! - folds each NIC element into a [`NicRecord`]
//! - resolves the host tap device of each NIC for the running hypervisor
//! - picks the policy driver (legacy firewall or security groups)
//!
//! ## Architecture
//!
//! ```text
//!  base64 VM description
//!          │
//!          ▼
//! ┌─────────────────┐   DriverKind   ┌──────────────────────┐
//! │   dispatch      │ ─────────────▶ │    NetworkDriver     │
//! └─────────────────┘                │  (process / lock)    │
//!                                    └──────────┬───────────┘
//!                                               │
//!                     ┌─────────────────────────┼───────────────────┐
//!                     ▼                         ▼                   ▼
//!            ┌────────────────┐       ┌──────────────────┐  ┌──────────────┐
//!            │  VmDocument    │       │ VmEntity + NICs  │  │  hypervisor  │
//!            │ (path queries) │       │ (normalize, tap) │  │   resolver   │
//!            └────────────────┘       └──────────────────┘  └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vnm_driver::{DriverContext, NetworkDriver, Settings};
//!
//! let context = DriverContext::system(Settings::load_or_default(vnm_driver::DEFAULT_SETTINGS_PATH));
//! let driver = NetworkDriver::filter_driver(&vm_64, Some("one-12"), None, context)?;
//!
//! driver.with_lock(|driver| {
//!     driver.process(|nic| println!("{:?} on {:?}", nic.tap(), nic.bridge()));
//!     Ok::<_, vnm_driver::DriverError>(())
//! })?;
//! ```

pub mod commands;
pub mod dispatch;
pub mod document;
pub mod driver;
pub mod error;
pub mod hypervisor;
pub mod lock;
pub mod mock;
pub mod network;
pub mod nic;
pub mod settings;
pub mod vm;

pub use commands::{HostCommands, SystemCommands};
pub use dispatch::{select_driver, select_driver_base64, DriverKind};
pub use document::{decode_base64, Element, VmDocument};
pub use driver::{DriverContext, NetworkDriver};
pub use error::{DriverError, Result};
pub use hypervisor::{HostProbe, HypervisorProbe, HypervisorTag};
pub use lock::DriverLock;
pub use mock::{MockCommands, MockProbe};
pub use network::BridgeTable;
pub use nic::{NicRecord, NicValue};
pub use settings::{CommandTable, Settings, DEFAULT_SETTINGS_PATH};
pub use vm::{normalize_deploy_id, VmEntity};
