//! Device inventory sources.
//!
//! [`DeviceInventory`] is the seam between the verification engine and the
//! hardware. Each call to [`DeviceInventory::query`] must reflect the current
//! hardware state; callers decide how long a returned snapshot is reused.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::device::{PhysicalDevice, PortActivityRule};
use crate::error::{InventoryError, InventoryResult};
use crate::smi::{self, SmiRecord};
use crate::snapshot::InventorySnapshot;
use crate::sysfs::{self, FabricInterface};

/// PCI vendor id of the accelerator modules.
pub const ACCELERATOR_VENDOR_ID: &str = "1da3";

/// A source of physical device records.
#[async_trait]
pub trait DeviceInventory: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Queries the current devices.
    async fn query(&self) -> InventoryResult<Vec<PhysicalDevice>>;

    /// Queries the current devices and indexes them.
    async fn snapshot(&self) -> InventoryResult<InventorySnapshot> {
        InventorySnapshot::new(self.query().await?)
    }
}

/// Live inventory built from the vendor query utility and sysfs.
#[derive(Debug, Clone)]
pub struct SystemInventory {
    smi_path: String,
    sysfs_root: PathBuf,
    vendor_id: String,
    rule: PortActivityRule,
}

impl SystemInventory {
    /// Creates a system inventory with default paths.
    pub fn new(rule: PortActivityRule) -> Self {
        Self {
            smi_path: smi::SMI_CMD.to_string(),
            sysfs_root: PathBuf::from(sysfs::SYSFS_FABRIC_ROOT),
            vendor_id: ACCELERATOR_VENDOR_ID.to_string(),
            rule,
        }
    }

    /// Overrides the query utility path.
    pub fn with_smi_path(mut self, path: impl Into<String>) -> Self {
        self.smi_path = path.into();
        self
    }

    /// Overrides the sysfs class directory.
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Overrides the accelerator vendor id.
    pub fn with_vendor_id(mut self, vendor_id: impl Into<String>) -> Self {
        self.vendor_id = vendor_id.into().to_ascii_lowercase();
        self
    }
}

#[async_trait]
impl DeviceInventory for SystemInventory {
    fn name(&self) -> &str {
        "system"
    }

    #[instrument(skip(self), fields(smi = %self.smi_path, sysfs = %self.sysfs_root.display()))]
    async fn query(&self) -> InventoryResult<Vec<PhysicalDevice>> {
        let records = smi::query_modules(&self.smi_path).await?;

        let root = self.sysfs_root.clone();
        let rule = self.rule;
        let interfaces = tokio::task::spawn_blocking(move || sysfs::scan(&root, rule))
            .await
            .map_err(|e| {
                InventoryError::read(
                    &self.sysfs_root,
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                )
            })??;

        let devices = merge(records, interfaces, &self.vendor_id);
        info!(devices = devices.len(), "Queried device inventory");
        Ok(devices)
    }
}

/// Joins module table rows with fabric interfaces of `vendor_id` by bus id.
///
/// Modules without a fabric interface are kept with no ports so that links
/// to them resolve and then fail the port health check instead of looking
/// like missing hardware.
pub fn merge(
    records: Vec<SmiRecord>,
    interfaces: Vec<FabricInterface>,
    vendor_id: &str,
) -> Vec<PhysicalDevice> {
    let mut by_bus: HashMap<String, FabricInterface> = HashMap::new();
    for iface in interfaces {
        if iface.vendor_id.as_deref() != Some(vendor_id) {
            debug!(interface = %iface.name, vendor = ?iface.vendor_id, "Skipping foreign fabric interface");
            continue;
        }
        match iface.bus_id.clone() {
            Some(bus_id) => {
                by_bus.insert(bus_id, iface);
            }
            None => warn!(interface = %iface.name, "Fabric interface has no PCI bus id"),
        }
    }

    records
        .into_iter()
        .map(|record| {
            let mut device =
                PhysicalDevice::new(record.bus_id.clone(), record.module_id, record.index, "");
            match by_bus.remove(&record.bus_id) {
                Some(iface) => {
                    device.fabric_interface_name = iface.name;
                    device.ports = iface.ports;
                }
                None => warn!(
                    bus_id = %record.bus_id,
                    module_id = record.module_id,
                    "No fabric interface found for module"
                ),
            }
            device
        })
        .collect()
}

/// Fixed inventory, from memory or from a JSON file of device records.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    devices: Vec<PhysicalDevice>,
    source: Option<PathBuf>,
}

impl StaticInventory {
    /// Creates an inventory returning `devices` on every query.
    pub fn new(devices: Vec<PhysicalDevice>) -> Self {
        Self {
            devices,
            source: None,
        }
    }

    /// Creates an inventory that re-reads `path` on every query.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            devices: Vec::new(),
            source: Some(path.into()),
        }
    }

    /// Reads a JSON array of device records.
    pub fn load(path: &Path) -> InventoryResult<Vec<PhysicalDevice>> {
        let content = fs::read_to_string(path).map_err(|e| InventoryError::read(path, e))?;
        serde_json::from_str(&content).map_err(|e| InventoryError::InvalidFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[async_trait]
impl DeviceInventory for StaticInventory {
    fn name(&self) -> &str {
        "static"
    }

    async fn query(&self) -> InventoryResult<Vec<PhysicalDevice>> {
        match &self.source {
            Some(path) => Self::load(path),
            None => Ok(self.devices.clone()),
        }
    }
}
