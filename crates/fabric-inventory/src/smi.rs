//! Vendor query utility adapter.
//!
//! Runs the management utility in CSV mode and parses the module table:
//!
//! ```text
//! index, module_id, bus_id
//! 0, 3, 0000:4d:00.0
//! 1, 1, 0000:b3:00.0
//! ```

use std::process::Stdio;
use tokio::process::Command;

use crate::error::{InventoryError, InventoryResult};

/// Default name of the vendor query utility.
pub const SMI_CMD: &str = "hl-smi";

/// Query fields requested from the utility, in output order.
pub const SMI_QUERY_FIELDS: &str = "index,module_id,bus_id";

/// Result of running the query utility.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// One row of the module table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmiRecord {
    /// Enumeration index.
    pub index: u32,
    /// Module id.
    pub module_id: u32,
    /// PCI bus id, lowercased.
    pub bus_id: String,
}

/// Runs `program args...` without a shell and captures its output.
pub async fn exec(program: &str, args: &[&str]) -> InventoryResult<ExecResult> {
    let command = format!("{} {}", program, args.join(" "));
    tracing::debug!(command = %command, "Executing query command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| InventoryError::QueryExec {
            command: command.clone(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::warn!(
            command = %command,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Query command failed"
        );
    }

    Ok(result)
}

/// Runs the query utility at `smi_path` and returns the parsed module table.
pub async fn query_modules(smi_path: &str) -> InventoryResult<Vec<SmiRecord>> {
    let args = ["-Q", SMI_QUERY_FIELDS, "-f", "csv"];
    let result = exec(smi_path, &args).await?;
    if !result.success() {
        return Err(InventoryError::QueryFailed {
            command: format!("{} {}", smi_path, args.join(" ")),
            exit_code: result.exit_code,
            output: result.combined_output(),
        });
    }
    parse_module_table(&result.stdout)
}

/// Parses the CSV module table. The header decides column order.
pub fn parse_module_table(text: &str) -> InventoryResult<Vec<SmiRecord>> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();
    let column = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| InventoryError::parse(1, format!("missing '{}' column", name)))
    };
    let index_col = column("index")?;
    let module_col = column("module_id")?;
    let bus_col = column("bus_id")?;

    let mut records = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |col: usize| {
            fields
                .get(col)
                .copied()
                .ok_or_else(|| InventoryError::parse(line_no, "too few fields"))
        };
        let number = |col: usize, name: &str| -> InventoryResult<u32> {
            let value = field(col)?;
            value.parse().map_err(|_| {
                InventoryError::parse(line_no, format!("{} '{}' is not a number", name, value))
            })
        };

        records.push(SmiRecord {
            index: number(index_col, "index")?,
            module_id: number(module_col, "module_id")?,
            bus_id: field(bus_col)?.to_ascii_lowercase(),
        });
    }
    Ok(records)
}
