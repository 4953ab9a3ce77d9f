//! Link, request and result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a logical link: a module and one of its fabric ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleEndpoint {
    /// Module id as used in the connectivity descriptor.
    pub module_id: u32,
    /// Fabric port number on that module.
    pub port: u32,
}

impl ModuleEndpoint {
    /// Creates an endpoint.
    pub fn new(module_id: u32, port: u32) -> Self {
        Self { module_id, port }
    }
}

impl fmt::Display for ModuleEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module {} port {}", self.module_id, self.port)
    }
}

/// Intended wiring between two module ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalLink {
    /// Server end.
    pub source: ModuleEndpoint,
    /// Client end.
    pub destination: ModuleEndpoint,
}

impl LogicalLink {
    /// Creates a link from `(module, port)` pairs.
    pub fn new(source: (u32, u32), destination: (u32, u32)) -> Self {
        Self {
            source: ModuleEndpoint::new(source.0, source.1),
            destination: ModuleEndpoint::new(destination.0, destination.1),
        }
    }

    /// Returns true if both ends name the same module.
    pub fn is_self_loop(&self) -> bool {
        self.source.module_id == self.destination.module_id
    }

    /// Returns true if either end is on `module_id`.
    pub fn touches_module(&self, module_id: u32) -> bool {
        self.source.module_id == module_id || self.destination.module_id == module_id
    }
}

impl fmt::Display for LogicalLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source.module_id, self.source.port, self.destination.module_id, self.destination.port
        )
    }
}

/// A logical link whose two ends resolved to physical devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedLink {
    /// The descriptor entry this link came from.
    pub logical: LogicalLink,
    /// Bus id of the source device.
    pub source_bus_id: String,
    /// Bus id of the destination device.
    pub dest_bus_id: String,
    /// Fabric interface of the source device.
    pub source_interface: String,
    /// Fabric interface of the destination device.
    pub dest_interface: String,
    /// Address of the source port, if reported.
    pub source_address: Option<String>,
    /// Address of the destination port, if reported.
    pub dest_address: Option<String>,
}

impl ValidatedLink {
    /// `<interface>:port<n>` for the source end, with address if known.
    pub fn source_descriptor(&self) -> String {
        describe(&self.source_interface, self.logical.source.port, self.source_address.as_deref())
    }

    /// `<interface>:port<n>` for the destination end, with address if known.
    pub fn dest_descriptor(&self) -> String {
        describe(
            &self.dest_interface,
            self.logical.destination.port,
            self.dest_address.as_deref(),
        )
    }
}

fn describe(interface: &str, port: u32, address: Option<&str>) -> String {
    match address {
        Some(address) => format!("{}:port{} (GID: {})", interface, port, address),
        None => format!("{}:port{}", interface, port),
    }
}

/// Benchmark parameters shared by the server and client invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestParams {
    /// Test kind passed to the benchmark (`-t`), e.g. `pp` for ping-pong.
    pub kind: String,
    /// Message size in bytes (`-s`).
    pub message_size: u32,
    /// Iteration count (`-n`).
    pub iteration_count: u32,
    /// Client deadline in seconds.
    pub timeout_seconds: u64,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            kind: "pp".to_string(),
            message_size: 4096,
            iteration_count: 1000,
            timeout_seconds: 300,
        }
    }
}

/// A pending verification of one active link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    /// Unique id within the run.
    pub id: String,
    /// The link under test.
    pub link: ValidatedLink,
    /// Benchmark parameters.
    pub params: TestParams,
    /// Lower values run first.
    pub priority: i32,
}

/// Terminal status of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The benchmark ran and reported success.
    Success,
    /// The benchmark ran and reported failure.
    Failed,
    /// The client did not finish before its deadline.
    Timeout,
    /// The benchmark could not be run.
    Error,
}

impl TestStatus {
    /// Lowercase status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Success => "success",
            TestStatus::Failed => "failed",
            TestStatus::Timeout => "timeout",
            TestStatus::Error => "error",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value with its unit, as printed by the benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Numeric value.
    pub value: f64,
    /// Unit text, e.g. `Gb/s` or `usec`.
    pub unit: String,
}

impl Measurement {
    /// Creates a measurement.
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

/// Coarse performance figures extracted from benchmark output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Throughput, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<Measurement>,
    /// Latency, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<Measurement>,
}

impl Metrics {
    /// Returns true if no figure was found.
    pub fn is_empty(&self) -> bool {
        self.throughput.is_none() && self.latency.is_none()
    }
}

/// Outcome of one executed request.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// The request this result belongs to.
    pub request_id: String,
    /// Terminal status.
    pub status: TestStatus,
    /// When the supervisor started the request.
    pub start_time: DateTime<Utc>,
    /// When the supervisor finished the request.
    pub end_time: DateTime<Utc>,
    /// Source descriptor, `<interface>:port<n>`.
    pub source: String,
    /// Destination descriptor, `<interface>:port<n>`.
    pub destination: String,
    /// Extracted performance figures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Server output lines, ANSI sequences removed.
    #[serde(skip)]
    pub raw_server_output: Vec<String>,
    /// Client output lines, ANSI sequences removed.
    #[serde(skip)]
    pub raw_client_output: Vec<String>,
    /// Pids of every process spawned for this request.
    #[serde(skip)]
    pub process_ids: Vec<u32>,
}

impl TestResult {
    /// Creates a result for `request` with the given status, stamped now.
    pub fn new(request: &TestRequest, status: TestStatus) -> Self {
        let now = Utc::now();
        Self {
            request_id: request.id.clone(),
            status,
            start_time: now,
            end_time: now,
            source: request.link.source_descriptor(),
            destination: request.link.dest_descriptor(),
            metrics: None,
            error_message: None,
            raw_server_output: Vec::new(),
            raw_client_output: Vec::new(),
            process_ids: Vec::new(),
        }
    }

    /// Wall-clock duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}
