//! Normalized device and port records.
//!
//! Every inventory source (vendor query, sysfs scan, static file) is turned
//! into [`PhysicalDevice`] values at the inventory boundary. Downstream code
//! only ever sees this one representation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Rule used to derive [`PortState::is_active`] from the raw link state text.
///
/// Port state files read like `"4: ACTIVE"`, `"3: ARMED"` or `"1: DOWN"`.
/// The two rules disagree at the margins (`"5: ACTIVE_DEFER"` is active under
/// both, a bare `"ACTIVE"` only under the textual rule), so exactly one is
/// applied per inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortActivityRule {
    /// Active when the state text contains `ACTIVE` (case-insensitive).
    #[default]
    Textual,
    /// Active when the numeric state code is 4 (Active) or 5 (ActiveDefer).
    Numeric,
}

impl PortActivityRule {
    /// Returns true if `link_state` counts as active under this rule.
    pub fn is_active(&self, link_state: &str) -> bool {
        let state = link_state.trim();
        match self {
            PortActivityRule::Textual => state.to_ascii_uppercase().contains("ACTIVE"),
            PortActivityRule::Numeric => {
                let code = state.split(':').next().unwrap_or_default().trim();
                matches!(code, "4" | "5")
            }
        }
    }

    /// Returns the configuration name of the rule.
    pub fn as_str(&self) -> &'static str {
        match self {
            PortActivityRule::Textual => "textual",
            PortActivityRule::Numeric => "numeric",
        }
    }
}

/// Health of one fabric port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortState {
    /// Derived activity flag; the only field consumers test for health.
    pub is_active: bool,
    /// Raw link state text as reported by the hardware.
    pub link_state: String,
    /// Network-layer address (GID) used to reach the port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_id: Option<String>,
    /// Reported link rate, e.g. `"100 Gb/sec (4X EDR)"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    /// Link layer, e.g. `"Ethernet"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_layer: Option<String>,
}

impl PortState {
    /// Builds a port state, deriving `is_active` from `link_state` with `rule`.
    pub fn from_link_state(link_state: impl Into<String>, rule: PortActivityRule) -> Self {
        let link_state = link_state.into();
        Self {
            is_active: rule.is_active(&link_state),
            link_state,
            address_id: None,
            rate: None,
            link_layer: None,
        }
    }

    /// Sets the port address, ignoring the all-zero placeholder GID.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        let unset = address
            .chars()
            .all(|c| c == '0' || c == ':' || c.is_whitespace());
        self.address_id = if unset { None } else { Some(address) };
        self
    }

    /// Sets the link rate.
    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = Some(rate.into());
        self
    }

    /// Sets the link layer.
    pub fn with_link_layer(mut self, link_layer: impl Into<String>) -> Self {
        self.link_layer = Some(link_layer.into());
        self
    }
}

/// One accelerator module as seen by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDevice {
    /// PCI bus address, unique per device (e.g. `"0000:4d:00.0"`).
    pub bus_id: String,
    /// Module id used by the connectivity descriptor.
    pub module_id: u32,
    /// Enumeration index reported by the vendor query utility.
    pub index: u32,
    /// Fabric interface name (e.g. `"hbl_3"`).
    pub fabric_interface_name: String,
    /// Fabric ports keyed by port number.
    #[serde(default)]
    pub ports: BTreeMap<u32, PortState>,
}

impl PhysicalDevice {
    /// Creates a device with no ports.
    pub fn new(
        bus_id: impl Into<String>,
        module_id: u32,
        index: u32,
        fabric_interface_name: impl Into<String>,
    ) -> Self {
        Self {
            bus_id: bus_id.into(),
            module_id,
            index,
            fabric_interface_name: fabric_interface_name.into(),
            ports: BTreeMap::new(),
        }
    }

    /// Adds or replaces a port.
    pub fn with_port(mut self, port: u32, state: PortState) -> Self {
        self.ports.insert(port, state);
        self
    }

    /// Returns the state of `port` if the device reports it.
    pub fn port(&self, port: u32) -> Option<&PortState> {
        self.ports.get(&port)
    }

    /// Returns true if `port` exists and is active.
    pub fn is_port_active(&self, port: u32) -> bool {
        self.port(port).is_some_and(|p| p.is_active)
    }

    /// Returns the address of `port`, if known.
    pub fn port_address(&self, port: u32) -> Option<&str> {
        self.port(port).and_then(|p| p.address_id.as_deref())
    }

    /// Active port numbers in ascending order.
    pub fn active_ports(&self) -> Vec<u32> {
        self.ports
            .iter()
            .filter(|(_, state)| state.is_active)
            .map(|(num, _)| *num)
            .collect()
    }
}

impl fmt::Display for PhysicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device {} (module {}, bus {}, {})",
            self.index, self.module_id, self.bus_id, self.fabric_interface_name
        )
    }
}
