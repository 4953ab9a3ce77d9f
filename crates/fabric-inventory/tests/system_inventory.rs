//! Integration tests for the live inventory source.
//!
//! A stub query utility and a fake sysfs tree stand in for the hardware.

use fabric_inventory::{DeviceInventory, InventoryError, PortActivityRule, SystemInventory};
use pretty_assertions::assert_eq;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write(path: &Path, value: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, value).unwrap();
}

fn stub_smi(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("hl-smi");
    write(&path, &format!("#!/bin/sh\n{}\n", body));
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fake_interface(root: &Path, bus: &str, vendor: &str, name: &str, ports: &[(u32, &str)]) {
    let pci = root.join("devices/pci0000:00").join(bus);
    write(&pci.join("vendor"), &format!("0x{}\n", vendor));
    let dev = pci.join("infiniband").join(name);
    for (num, state) in ports {
        write(&dev.join("ports").join(num.to_string()).join("state"), state);
    }
    fs::create_dir_all(root.join("class")).unwrap();
    symlink(&dev, root.join("class").join(name)).unwrap();
}

#[tokio::test]
async fn test_system_inventory_merges_query_and_sysfs() {
    let tmp = TempDir::new().unwrap();
    let smi = stub_smi(
        tmp.path(),
        "printf 'index, module_id, bus_id\\n0, 0, 0000:4d:00.0\\n1, 1, 0000:b3:00.0\\n'",
    );
    fake_interface(tmp.path(), "0000:4d:00.0", "1da3", "hbl_0", &[(1, "4: ACTIVE"), (2, "3: ARMED")]);
    fake_interface(tmp.path(), "0000:b3:00.0", "1da3", "hbl_1", &[(1, "4: ACTIVE")]);
    fake_interface(tmp.path(), "0000:19:00.0", "15b3", "mlx5_0", &[(1, "4: ACTIVE")]);

    let inventory = SystemInventory::new(PortActivityRule::Textual)
        .with_smi_path(smi.to_string_lossy())
        .with_sysfs_root(tmp.path().join("class"));
    let snapshot = inventory.snapshot().await.unwrap();

    assert_eq!(snapshot.len(), 2);
    let module0 = snapshot.by_module_id(0).unwrap();
    assert_eq!(module0.fabric_interface_name, "hbl_0");
    assert_eq!(module0.active_ports(), vec![1]);
    assert_eq!(snapshot.by_module_id(1).unwrap().fabric_interface_name, "hbl_1");
}

#[tokio::test]
async fn test_numeric_rule_applied_at_boundary() {
    let tmp = TempDir::new().unwrap();
    let smi = stub_smi(tmp.path(), "printf 'index,module_id,bus_id\\n0,0,0000:4d:00.0\\n'");
    fake_interface(tmp.path(), "0000:4d:00.0", "1da3", "hbl_0", &[(1, "ACTIVE"), (2, "5: ACTIVE_DEFER")]);

    let inventory = SystemInventory::new(PortActivityRule::Numeric)
        .with_smi_path(smi.to_string_lossy())
        .with_sysfs_root(tmp.path().join("class"));
    let devices = inventory.query().await.unwrap();

    assert!(!devices[0].is_port_active(1));
    assert!(devices[0].is_port_active(2));
}

#[tokio::test]
async fn test_failing_query_utility() {
    let tmp = TempDir::new().unwrap();
    let smi = stub_smi(tmp.path(), "echo 'driver not loaded' >&2; exit 3");

    let inventory = SystemInventory::new(PortActivityRule::Textual)
        .with_smi_path(smi.to_string_lossy())
        .with_sysfs_root(tmp.path().join("class"));
    match inventory.query().await {
        Err(InventoryError::QueryFailed { exit_code, output, .. }) => {
            assert_eq!(exit_code, 3);
            assert!(output.contains("driver not loaded"));
        }
        other => panic!("Expected QueryFailed, got {:?}", other),
    }
}
