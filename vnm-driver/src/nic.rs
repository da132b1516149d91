//! Normalized NIC records.
//!
//! A NIC element of the VM description is folded into a [`NicRecord`]: each
//! direct child becomes an entry keyed by its lower-cased tag name. Policy
//! drivers look entries up by those exact keys (`bridge`, `network`, `mac`,
//! `ip`, `tap`, ...). Entries keep the order of the description.

use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::Serialize;

use crate::document::Element;

/// Well-known record keys.
pub mod keys {
    pub const BRIDGE: &str = "bridge";
    pub const NETWORK: &str = "network";
    pub const NETWORK_ID: &str = "network_id";
    pub const MAC: &str = "mac";
    pub const IP: &str = "ip";
    pub const TARGET: &str = "target";
    /// Host tap device, filled in by hypervisor enrichment.
    pub const TAP: &str = "tap";
    pub const VLAN_ID: &str = "vlan_id";
    pub const SECURITY_GROUPS: &str = "security_groups";
}

/// Value stored under a record key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NicValue {
    /// Text of a leaf element; `None` when the element is empty.
    Scalar(Option<String>),
    /// Element with children of its own.
    Record(NicRecord),
    /// The key was repeated under one NIC element.
    List(Vec<NicValue>),
}

impl NicValue {
    /// The text when this is a non-empty scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NicValue::Scalar(text) => text.as_deref(),
            _ => None,
        }
    }

    /// The nested record when this is a structured value.
    pub fn as_record(&self) -> Option<&NicRecord> {
        match self {
            NicValue::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Every occurrence of the key, in document order.
    pub fn occurrences(&self) -> &[NicValue] {
        match self {
            NicValue::List(items) => items,
            single => std::slice::from_ref(single),
        }
    }
}

impl From<&str> for NicValue {
    fn from(text: &str) -> Self {
        NicValue::Scalar(Some(text.to_string()))
    }
}

impl From<String> for NicValue {
    fn from(text: String) -> Self {
        NicValue::Scalar(Some(text))
    }
}

/// Attributes of one NIC, keyed by lower-cased tag name, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NicRecord {
    attrs: IndexMap<String, NicValue>,
}

impl NicRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from the direct children of `element`.
    pub fn from_element(element: &Element) -> Self {
        let mut record = Self::new();
        record.fold_element(element);
        record
    }

    /// Merge the direct children of `element` into this record, in document
    /// order. Children with children of their own become nested records.
    pub fn fold_element(&mut self, element: &Element) {
        for child in element.children() {
            let value = if child.has_children() {
                NicValue::Record(NicRecord::from_element(child))
            } else {
                NicValue::Scalar(child.text().map(str::to_string))
            };
            self.merge(child.name().to_lowercase(), value);
        }
    }

    /// Add an occurrence of `key`.
    ///
    /// The first occurrence is stored as is, the second turns the entry into
    /// a two element list and later ones are appended to it.
    pub fn merge(&mut self, key: impl Into<String>, value: NicValue) {
        match self.attrs.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                NicValue::List(items) => items.push(value),
                existing => {
                    let first = std::mem::replace(existing, NicValue::List(Vec::new()));
                    *existing = NicValue::List(vec![first, value]);
                }
            },
        }
    }

    /// Replace whatever is stored under `key`. A new key goes last.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<NicValue>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&NicValue> {
        self.attrs.get(key)
    }

    /// Text stored under `key`, when it is a single non-empty scalar.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(NicValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NicValue)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    // =========================================================================
    // Well-known attributes
    // =========================================================================

    pub fn bridge(&self) -> Option<&str> {
        self.text(keys::BRIDGE)
    }

    pub fn network(&self) -> Option<&str> {
        self.text(keys::NETWORK)
    }

    pub fn mac(&self) -> Option<&str> {
        self.text(keys::MAC)
    }

    pub fn ip(&self) -> Option<&str> {
        self.text(keys::IP)
    }

    /// Host tap device backing this NIC, once resolved.
    pub fn tap(&self) -> Option<&str> {
        self.text(keys::TAP)
    }

    pub fn target(&self) -> Option<&str> {
        self.text(keys::TARGET)
    }

    pub fn vlan_id(&self) -> Option<&str> {
        self.text(keys::VLAN_ID)
    }

    /// Security group ids, from the comma separated `security_groups` entry.
    pub fn security_groups(&self) -> Vec<&str> {
        self.text(keys::SECURITY_GROUPS)
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
