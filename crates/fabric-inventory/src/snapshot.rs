//! Read-only view of the devices present for one matching pass.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::device::PhysicalDevice;
use crate::error::{InventoryError, InventoryResult};

/// Devices keyed by bus id, with derived lookup indices.
///
/// The bus id map is the single authoritative collection. The module id and
/// index maps are rebuilt from it on every construction and never mutated on
/// their own.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    devices: BTreeMap<String, PhysicalDevice>,
    by_module: HashMap<u32, String>,
    by_index: HashMap<u32, String>,
}

impl InventorySnapshot {
    /// Builds a snapshot from device records.
    ///
    /// Fails on duplicate bus ids. When two devices report the same module id
    /// the one with the lowest bus id wins the module lookup and a warning is
    /// logged.
    pub fn new(devices: impl IntoIterator<Item = PhysicalDevice>) -> InventoryResult<Self> {
        let mut primary = BTreeMap::new();
        for device in devices {
            if primary.contains_key(&device.bus_id) {
                return Err(InventoryError::DuplicateBusId {
                    bus_id: device.bus_id,
                });
            }
            primary.insert(device.bus_id.clone(), device);
        }

        let mut snapshot = Self {
            devices: primary,
            by_module: HashMap::new(),
            by_index: HashMap::new(),
        };
        snapshot.rebuild_indices();
        Ok(snapshot)
    }

    fn rebuild_indices(&mut self) {
        self.by_module.clear();
        self.by_index.clear();
        // BTreeMap iteration is bus id ordered, so first insert wins.
        for (bus_id, device) in &self.devices {
            if let Some(existing) = self.by_module.get(&device.module_id) {
                warn!(
                    module_id = device.module_id,
                    kept = %existing,
                    ignored = %bus_id,
                    "Module id reported by more than one device"
                );
            } else {
                self.by_module.insert(device.module_id, bus_id.clone());
            }
            self.by_index.entry(device.index).or_insert_with(|| bus_id.clone());
        }
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no device was found.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Looks a device up by bus id.
    pub fn by_bus_id(&self, bus_id: &str) -> Option<&PhysicalDevice> {
        self.devices.get(bus_id)
    }

    /// Looks a device up by module id.
    pub fn by_module_id(&self, module_id: u32) -> Option<&PhysicalDevice> {
        self.by_module
            .get(&module_id)
            .and_then(|bus_id| self.devices.get(bus_id))
    }

    /// Looks a device up by enumeration index.
    pub fn by_index(&self, index: u32) -> Option<&PhysicalDevice> {
        self.by_index
            .get(&index)
            .and_then(|bus_id| self.devices.get(bus_id))
    }

    /// Returns true if `bus_id` is part of this snapshot.
    pub fn contains_bus_id(&self, bus_id: &str) -> bool {
        self.devices.contains_key(bus_id)
    }

    /// Devices ordered by enumeration index.
    pub fn devices_by_index(&self) -> Vec<&PhysicalDevice> {
        let mut devices: Vec<_> = self.devices.values().collect();
        devices.sort_by_key(|d| (d.index, d.bus_id.clone()));
        devices
    }
}
