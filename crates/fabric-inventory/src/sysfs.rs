//! Fabric interface scanner for `/sys/class/infiniband`.
//!
//! Each entry under the class directory is a symlink into the PCI device
//! tree. The last PCI address on the resolved path is the owning device's bus
//! id; the nearest `vendor` attribute above it identifies the vendor.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::device::{PortActivityRule, PortState};
use crate::error::{InventoryError, InventoryResult};

/// Default sysfs class directory for fabric interfaces.
pub const SYSFS_FABRIC_ROOT: &str = "/sys/class/infiniband";

/// Parent directories searched for a `vendor` attribute.
const VENDOR_SEARCH_DEPTH: usize = 10;

/// Matches a full PCI address path component, e.g. `0000:4d:00.0`.
static PCI_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{4}:[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]$")
        .expect("Invalid regex pattern")
});

/// A fabric interface found under the sysfs class directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricInterface {
    /// Interface name (directory name), e.g. `hbl_3`.
    pub name: String,
    /// Owning PCI device, if it could be resolved.
    pub bus_id: Option<String>,
    /// PCI vendor id without the `0x` prefix, lowercased.
    pub vendor_id: Option<String>,
    /// Ports keyed by port number.
    pub ports: BTreeMap<u32, PortState>,
}

/// Scans `root` for fabric interfaces.
///
/// A missing root yields an empty list. Unreadable individual attributes are
/// logged and skipped; only a failure to list `root` itself is an error.
pub fn scan(root: &Path, rule: PortActivityRule) -> InventoryResult<Vec<FabricInterface>> {
    if !root.exists() {
        warn!(path = %root.display(), "Fabric sysfs root does not exist");
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(root).map_err(|e| InventoryError::read(root, e))?;
    let mut interfaces = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| InventoryError::read(root, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        let (bus_id, pci_path) = match fs::canonicalize(&path) {
            Ok(real) => match pci_device_path(&real) {
                Some((bus, pci)) => (Some(bus), Some(pci)),
                None => (None, None),
            },
            Err(e) => {
                warn!(interface = %name, error = %e, "Cannot resolve fabric interface path");
                (None, None)
            }
        };
        let vendor_id = pci_path.as_deref().and_then(find_vendor_id);
        let ports = scan_ports(&path, rule);

        debug!(
            interface = %name,
            bus_id = ?bus_id,
            vendor_id = ?vendor_id,
            ports = ports.len(),
            "Found fabric interface"
        );
        interfaces.push(FabricInterface {
            name,
            bus_id,
            vendor_id,
            ports,
        });
    }

    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(interfaces)
}

/// Returns the last PCI address on `real_path` and the path up to it.
fn pci_device_path(real_path: &Path) -> Option<(String, PathBuf)> {
    let mut found = None;
    let mut prefix = PathBuf::new();
    for component in real_path.components() {
        prefix.push(component);
        let text = component.as_os_str().to_string_lossy();
        if PCI_ADDRESS_RE.is_match(&text) {
            found = Some((text.to_ascii_lowercase(), prefix.clone()));
        }
    }
    found
}

fn find_vendor_id(pci_path: &Path) -> Option<String> {
    let mut current = Some(pci_path);
    for _ in 0..VENDOR_SEARCH_DEPTH {
        let dir = current?;
        if let Some(vendor) = read_attr(&dir.join("vendor")) {
            let vendor = vendor.to_ascii_lowercase();
            let vendor = vendor.strip_prefix("0x").unwrap_or(&vendor).to_string();
            return Some(vendor);
        }
        current = dir.parent();
    }
    None
}

fn scan_ports(device_path: &Path, rule: PortActivityRule) -> BTreeMap<u32, PortState> {
    let mut ports = BTreeMap::new();
    let Ok(entries) = fs::read_dir(device_path.join("ports")) else {
        return ports;
    };

    for entry in entries.flatten() {
        let Ok(port_num) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let port_path = entry.path();

        let state = read_attr(&port_path.join("state")).unwrap_or_else(|| "Unknown".to_string());
        let mut port = PortState::from_link_state(state, rule);
        if let Some(link_layer) = read_attr(&port_path.join("link_layer")) {
            port = port.with_link_layer(link_layer);
        }
        if let Some(rate) = read_attr(&port_path.join("rate")) {
            port = port.with_rate(rate);
        }
        if let Some(gid) = read_attr(&port_path.join("gids").join("0")) {
            port = port.with_address(gid);
        }
        ports.insert(port_num, port);
    }
    ports
}

fn read_attr(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(value) => Some(value.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unreadable sysfs attribute");
            None
        }
    }
}
