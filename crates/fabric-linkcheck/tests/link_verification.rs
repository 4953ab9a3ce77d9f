//! End-to-end runs against a static inventory.
//!
//! A shell stub stands in for the benchmark binary: it tells client from
//! server by the trailing server address argument.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fabric_inventory::{PhysicalDevice, PortActivityRule, PortState, StaticInventory};
use fabric_linkcheck::{
    ConnectivityDescriptor, DetailEntry, LinkRunner, LinkcheckError, ProcessSupervisor, RunOptions,
    SupervisorConfig, TestExecutor, TestParams, TestRequest, TestResult, TestStatus,
};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PASSING_PAIR: &str = r#"for last; do :; done
if [ "$last" = "127.0.0.1" ]; then
  echo "Bandwidth: 94.2 Gb/s"
  echo "Test PASS"
  exit 0
fi
echo "Test PASS"
exec sleep 30
"#;

/// Each side leaves a background sleep in its process group, records its pid
/// and then blocks.
const HANGING_PAIR: &str = r#"sleep 60 >/dev/null 2>&1 &
echo $! >> "$(dirname "$0")/grandchildren"
wait
"#;

fn stub(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("perf_test");
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Gone from the process table, or left only as an unreaped zombie.
fn assert_gone(pid: u32) {
    let gone = match kill(Pid::from_raw(pid as i32), None) {
        Err(Errno::ESRCH) => true,
        _ => fs::read_to_string(format!("/proc/{}/stat", pid)).map_or(true, |stat| {
            let rest = &stat[stat.rfind(')').map_or(0, |i| i + 1)..];
            rest.split_whitespace().next() == Some("Z")
        }),
    };
    assert!(gone, "pid {} still running", pid);
}

fn port(link_state: &str) -> PortState {
    PortState::from_link_state(link_state, PortActivityRule::Textual)
}

fn device(module_id: u32, ports: &[(u32, &str)]) -> PhysicalDevice {
    let mut device = PhysicalDevice::new(
        format!("0000:{:02x}:00.0", 0x40 + module_id),
        module_id,
        module_id,
        format!("hbl_{}", module_id),
    );
    for (num, state) in ports {
        device = device.with_port(*num, port(state));
    }
    device
}

fn two_modules() -> Vec<PhysicalDevice> {
    vec![
        device(0, &[(1, "4: ACTIVE"), (2, "4: ACTIVE")]),
        device(1, &[(1, "4: ACTIVE"), (2, "4: ACTIVE")]),
    ]
}

fn supervisor(path: PathBuf) -> ProcessSupervisor {
    ProcessSupervisor::new(SupervisorConfig {
        benchmark_path: path,
        server_start_grace: Duration::from_millis(200),
        termination_grace: Duration::from_secs(1),
        abort_grace: Duration::from_millis(200),
        ..Default::default()
    })
}

fn options(timeout_seconds: u64) -> RunOptions {
    RunOptions {
        params: TestParams {
            timeout_seconds,
            ..Default::default()
        },
        max_concurrent_tests: 2,
        ..Default::default()
    }
}

fn test_results(details: &[DetailEntry]) -> Vec<&TestResult> {
    details
        .iter()
        .filter_map(|d| match d {
            DetailEntry::Test { result, .. } => Some(result),
            DetailEntry::Skipped { .. } => None,
        })
        .collect()
}

#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl TestExecutor for CountingExecutor {
    async fn execute(&self, request: &TestRequest, _cancel: &CancellationToken) -> TestResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TestResult::new(request, TestStatus::Success)
    }
}

#[tokio::test]
async fn test_two_links_pass() {
    let tmp = TempDir::new().unwrap();
    let runner = LinkRunner::new(
        Arc::new(StaticInventory::new(two_modules())),
        Arc::new(supervisor(stub(tmp.path(), PASSING_PAIR))),
        options(10),
    );

    let plan = runner
        .plan(&ConnectivityDescriptor::parse("0 1 1 1\n1 2 0 1\n"))
        .await
        .unwrap();
    let report = runner.execute(plan, CancellationToken::new()).await;

    let s = &report.summary;
    assert_eq!(s.total, 2);
    assert_eq!(s.submitted, 2);
    assert_eq!(s.success, 2);
    assert!(s.is_consistent());
    assert_eq!(report.exit_code(), 0);
    assert!(!report.aborted);

    for result in test_results(&report.details) {
        let throughput = result.metrics.as_ref().and_then(|m| m.throughput.clone()).unwrap();
        assert_eq!(throughput.value, 94.2);
        assert_eq!(throughput.unit, "Gb/s");
    }
}

#[tokio::test]
async fn test_missing_module_is_skipped() {
    let executor = Arc::new(CountingExecutor::default());
    let runner = LinkRunner::new(
        Arc::new(StaticInventory::new(two_modules())),
        executor.clone(),
        options(10),
    );

    let plan = runner
        .plan(&ConnectivityDescriptor::parse("0 1 5 1\n"))
        .await
        .unwrap();
    let report = runner.execute(plan, CancellationToken::new()).await;

    assert_eq!(report.summary.total, 1);
    assert_eq!(report.summary.skipped_missing_device, 1);
    assert_eq!(report.summary.submitted, 0);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_inactive_port_spawns_nothing() {
    let devices = vec![
        device(0, &[(1, "4: ACTIVE")]),
        device(1, &[(1, "1: DOWN")]),
    ];
    let executor = Arc::new(CountingExecutor::default());
    let runner = LinkRunner::new(Arc::new(StaticInventory::new(devices)), executor.clone(), options(10));

    let plan = runner
        .plan(&ConnectivityDescriptor::parse("0 1 1 1\n"))
        .await
        .unwrap();
    let report = runner.execute(plan, CancellationToken::new()).await;

    assert_eq!(report.summary.skipped_inactive_port, 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    match &report.details[0] {
        DetailEntry::Skipped { message, .. } => assert_eq!(message, "Inactive destination port"),
        other => panic!("unexpected detail {:?}", other),
    }
}

#[tokio::test]
async fn test_hanging_pair_times_out_and_is_reaped() {
    let tmp = TempDir::new().unwrap();
    let runner = LinkRunner::new(
        Arc::new(StaticInventory::new(two_modules())),
        Arc::new(supervisor(stub(tmp.path(), HANGING_PAIR))),
        options(2),
    );

    let plan = runner
        .plan(&ConnectivityDescriptor::parse("0 1 1 1\n"))
        .await
        .unwrap();
    let report = runner.execute(plan, CancellationToken::new()).await;

    assert_eq!(report.summary.timeout, 1);
    assert_eq!(report.exit_code(), 1);

    let results = test_results(&report.details);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, TestStatus::Timeout);
    assert_eq!(results[0].process_ids.len(), 2);
    for pid in &results[0].process_ids {
        assert_eq!(kill(Pid::from_raw(*pid as i32), None), Err(Errno::ESRCH), "pid {} alive", pid);
    }

    let grandchildren: Vec<u32> = fs::read_to_string(tmp.path().join("grandchildren"))
        .unwrap()
        .lines()
        .map(|l| l.trim().parse().unwrap())
        .collect();
    assert_eq!(grandchildren.len(), 2);
    for pid in grandchildren {
        assert_gone(pid);
    }
}

#[tokio::test]
async fn test_per_test_logs_written() {
    let tmp = TempDir::new().unwrap();
    let log_dir = tmp.path().join("logs");
    let runner = LinkRunner::new(
        Arc::new(StaticInventory::new(two_modules())),
        Arc::new(supervisor(stub(tmp.path(), PASSING_PAIR))),
        RunOptions {
            log_dir: Some(log_dir.clone()),
            ..options(10)
        },
    );

    let plan = runner
        .plan(&ConnectivityDescriptor::parse("0 2 1 2\n"))
        .await
        .unwrap();
    let report = runner.execute(plan, CancellationToken::new()).await;
    assert_eq!(report.summary.success, 1);

    let dirs: Vec<_> = fs::read_dir(&log_dir).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(dirs.len(), 1);
    let client = fs::read_to_string(dirs[0].join("client.log")).unwrap();
    assert!(client.contains("Test PASS"));
    assert!(dirs[0].join("summary.json").exists());
}

#[tokio::test]
async fn test_inventory_file_drives_run() {
    let tmp = TempDir::new().unwrap();
    let inventory_path = tmp.path().join("devices.json");
    fs::write(&inventory_path, serde_json::to_string(&two_modules()).unwrap()).unwrap();
    let descriptor_path = tmp.path().join("connectivity.csv");
    fs::write(&descriptor_path, "# src_module src_port dst_module dst_port\n0 1 1 1\n0 1 0 2\n").unwrap();

    let executor = Arc::new(CountingExecutor::default());
    let runner = LinkRunner::new(
        Arc::new(StaticInventory::from_file(inventory_path)),
        executor.clone(),
        options(10),
    );
    let report = runner.run(&descriptor_path, CancellationToken::new()).await.unwrap();

    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.success, 1);
    assert_eq!(report.summary.skipped_same_module, 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreadable_descriptor_is_fatal() {
    let runner = LinkRunner::new(
        Arc::new(StaticInventory::new(two_modules())),
        Arc::new(CountingExecutor::default()),
        RunOptions::default(),
    );
    let err = runner
        .run(Path::new("/nonexistent/connectivity.csv"), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LinkcheckError::DescriptorRead { .. }));
    assert!(err.is_fatal_input());
}
