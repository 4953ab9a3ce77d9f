//! Accelerator module and fabric port inventory.
//!
//! This crate turns what the hardware reports into one normalized record per
//! accelerator module:
//!
//! - [`device`]: [`PhysicalDevice`] / [`PortState`] and the port activity rule
//! - [`snapshot`]: [`InventorySnapshot`], bus id keyed with derived indices
//! - [`inventory`]: the [`DeviceInventory`] trait and its system/static sources
//! - [`smi`]: vendor query utility adapter
//! - [`sysfs`]: fabric interface and port scanner
//!
//! # Example
//!
//! ```ignore
//! use fabric_inventory::{DeviceInventory, PortActivityRule, SystemInventory};
//!
//! let inventory = SystemInventory::new(PortActivityRule::Textual);
//! let snapshot = inventory.snapshot().await?;
//! for device in snapshot.devices_by_index() {
//!     println!("{} active ports {:?}", device, device.active_ports());
//! }
//! ```

pub mod device;
pub mod error;
pub mod inventory;
pub mod smi;
pub mod snapshot;
pub mod sysfs;

pub use device::{PhysicalDevice, PortActivityRule, PortState};
pub use error::{InventoryError, InventoryResult};
pub use inventory::{DeviceInventory, StaticInventory, SystemInventory, ACCELERATOR_VENDOR_ID};
pub use snapshot::InventorySnapshot;
