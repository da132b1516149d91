//! Host bridge topology.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use crate::commands::HostCommands;

/// Bridges on the host and the interfaces attached to each, in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BridgeTable {
    bridges: BTreeMap<String, Vec<String>>,
}

impl BridgeTable {
    /// Read the table with `<brctl> show`.
    ///
    /// A failed listing is logged and yields an empty table.
    #[instrument(skip(commands))]
    pub fn load(commands: &dyn HostCommands, brctl: &str) -> Self {
        match commands.run(brctl, &["show"]) {
            Ok(output) => Self::parse(&output),
            Err(e) => {
                warn!(error = %e, "Failed to list bridges");
                Self::default()
            }
        }
    }

    /// Parse `brctl show` output.
    ///
    /// ```text
    /// bridge name     bridge id               STP enabled     interfaces
    /// br0             8000.525400123456       no              eth0
    ///                                                         vnet0
    /// br1             8000.000000000000       no
    /// ```
    pub fn parse(output: &str) -> Self {
        let mut table = Self::default();
        let mut current: Option<String> = None;

        for line in output.lines().skip(1) {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [] => {}
                [iface] => match &current {
                    Some(bridge) => table.attach(bridge, iface),
                    None => debug!(iface = %iface, "Interface listed before any bridge"),
                },
                [bridge, rest @ ..] => {
                    table.bridges.insert(bridge.to_string(), Vec::new());
                    if let Some(iface) = rest.get(2) {
                        table.attach(bridge, iface);
                    }
                    current = Some(bridge.to_string());
                }
            }
        }

        table
    }

    fn attach(&mut self, bridge: &str, iface: &str) {
        self.bridges
            .entry(bridge.to_string())
            .or_default()
            .push(iface.to_string());
    }

    /// Interfaces attached to `bridge`.
    pub fn interfaces(&self, bridge: &str) -> Option<&[String]> {
        self.bridges.get(bridge).map(Vec::as_slice)
    }

    pub fn contains(&self, bridge: &str) -> bool {
        self.bridges.contains_key(bridge)
    }

    /// Bridge names, sorted.
    pub fn bridges(&self) -> impl Iterator<Item = &str> {
        self.bridges.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}
