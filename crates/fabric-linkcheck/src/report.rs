//! Run report output and per-test logs.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use fabric_inventory::InventorySnapshot;

use crate::aggregator::{DetailEntry, RunSummary};
use crate::error::{LinkcheckError, LinkcheckResult};
use crate::types::TestResult;

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True if the run was cancelled before every request finished.
    pub aborted: bool,
    /// Configured worker count.
    pub max_concurrent_tests: usize,
    /// Highest number of process pairs observed running at once.
    pub peak_concurrency: usize,
    pub summary: RunSummary,
    pub details: Vec<DetailEntry>,
}

impl RunReport {
    /// Process exit code: 0 if every submitted test succeeded, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.summary.all_succeeded() {
            0
        } else {
            1
        }
    }

    /// Writes pretty JSON to `output`, or stdout when `None`.
    pub fn write(&self, output: Option<&Path>) -> LinkcheckResult<()> {
        write_json(self, output)
    }

    /// One-line human summary.
    pub fn headline(&self) -> String {
        let s = &self.summary;
        format!(
            "{} links: {} success, {} failed, {} timeout, {} error, {} incomplete, {} skipped (same module {}, missing device {}, inactive port {})",
            s.total,
            s.success,
            s.failed,
            s.timeout,
            s.error,
            s.incomplete,
            s.skipped_same_module + s.skipped_missing_device + s.skipped_inactive_port,
            s.skipped_same_module,
            s.skipped_missing_device,
            s.skipped_inactive_port,
        )
    }
}

/// Writes `value` as pretty JSON to `output`, or stdout when `None`.
pub fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> LinkcheckResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json + "\n").map_err(|e| LinkcheckError::io(path, e))?;
            info!(path = %path.display(), "Report written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json).map_err(|e| LinkcheckError::io("<stdout>", e))?;
        }
    }
    Ok(())
}

/// Writes `<dir>/<request_id>_<YYYYmmdd_HHMMSS>/{server.log,client.log,summary.json}`.
pub async fn write_test_logs(dir: &Path, result: &TestResult) -> LinkcheckResult<PathBuf> {
    let test_dir = dir.join(format!(
        "{}_{}",
        result.request_id,
        result.start_time.format("%Y%m%d_%H%M%S")
    ));
    tokio::fs::create_dir_all(&test_dir)
        .await
        .map_err(|e| LinkcheckError::io(&test_dir, e))?;

    let files = [
        ("server.log", join_lines(&result.raw_server_output)),
        ("client.log", join_lines(&result.raw_client_output)),
        ("summary.json", serde_json::to_string_pretty(result)?),
    ];
    for (name, content) in files {
        let path = test_dir.join(name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| LinkcheckError::io(&path, e))?;
    }

    debug!(request_id = %result.request_id, dir = %test_dir.display(), "Test logs written");
    Ok(test_dir)
}

fn join_lines(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// Device table ordered by index, with active ports.
pub fn render_devices(snapshot: &InventorySnapshot) -> String {
    let mut out = format!(
        "{:<6} {:<7} {:<14} {:<12} {}\n",
        "INDEX", "MODULE", "BUS ID", "INTERFACE", "ACTIVE PORTS"
    );
    for device in snapshot.devices_by_index() {
        let ports: Vec<String> = device.active_ports().iter().map(u32::to_string).collect();
        let interface = if device.fabric_interface_name.is_empty() {
            "-"
        } else {
            device.fabric_interface_name.as_str()
        };
        out.push_str(&format!(
            "{:<6} {:<7} {:<14} {:<12} {}\n",
            device.index,
            device.module_id,
            device.bus_id,
            interface,
            if ports.is_empty() {
                "none".to_string()
            } else {
                ports.join(",")
            }
        ));
    }
    out
}
