//! Configuration file support for fabric-linkcheck
//!
//! Loads and validates run settings from TOML files.
//! Default location: /etc/fabric-linkcheck/linkcheck.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use fabric_inventory::{smi, sysfs, PortActivityRule, ACCELERATOR_VENDOR_ID};

use crate::error::{LinkcheckError, LinkcheckResult};
use crate::supervisor::{SupervisorConfig, DEFAULT_BENCHMARK_PATH, DEFAULT_SERVER_ADDRESS};
use crate::types::TestParams;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fabric-linkcheck/linkcheck.toml";

/// Worker pool and process supervision settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum benchmark pairs running at once
    #[serde(default = "default_max_concurrent_tests")]
    pub max_concurrent_tests: usize,

    /// Benchmark executable
    #[serde(default = "default_benchmark_path")]
    pub benchmark_path: PathBuf,

    /// Address the client connects to
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// Address resolution index passed to both sides
    #[serde(default)]
    pub address_index: u32,

    /// Server startup grace in milliseconds
    #[serde(default = "default_server_start_grace")]
    pub server_start_grace_ms: u64,

    /// Server shutdown grace after SIGTERM in milliseconds
    #[serde(default = "default_termination_grace")]
    pub termination_grace_ms: u64,

    /// Shutdown grace for in-flight tests on abort, in milliseconds
    #[serde(default = "default_abort_grace")]
    pub abort_grace_ms: u64,

    /// Re-read port state right before each test
    #[serde(default)]
    pub recheck_ports_before_test: bool,

    /// Directory for per-test logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Benchmark parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Test kind, e.g. `pp` (ping-pong)
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Message size in bytes
    #[serde(default = "default_message_size")]
    pub message_size: u32,

    /// Iterations per test
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Client deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Queue priority for every request (lower runs first)
    #[serde(default)]
    pub priority: i32,
}

/// Device inventory source settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Vendor query utility
    #[serde(default = "default_smi_path")]
    pub smi_path: String,

    /// Fabric interface class directory
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Accelerator PCI vendor id
    #[serde(default = "default_vendor_id")]
    pub vendor_id: String,

    /// How a port's link state maps to active
    #[serde(default)]
    pub port_activity: PortActivityRule,

    /// JSON device list used instead of querying the system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_file: Option<PathBuf>,
}

/// Complete fabric-linkcheck configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkcheckConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub test: TestConfig,

    #[serde(default)]
    pub inventory: InventoryConfig,
}

fn default_max_concurrent_tests() -> usize {
    5
}

fn default_benchmark_path() -> PathBuf {
    PathBuf::from(DEFAULT_BENCHMARK_PATH)
}

fn default_server_address() -> String {
    DEFAULT_SERVER_ADDRESS.to_string()
}

fn default_server_start_grace() -> u64 {
    2000
}

fn default_termination_grace() -> u64 {
    5000
}

fn default_abort_grace() -> u64 {
    5000
}

fn default_kind() -> String {
    "pp".to_string()
}

fn default_message_size() -> u32 {
    4096
}

fn default_iterations() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_smi_path() -> String {
    smi::SMI_CMD.to_string()
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(sysfs::SYSFS_FABRIC_ROOT)
}

fn default_vendor_id() -> String {
    ACCELERATOR_VENDOR_ID.to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tests: default_max_concurrent_tests(),
            benchmark_path: default_benchmark_path(),
            server_address: default_server_address(),
            address_index: 0,
            server_start_grace_ms: default_server_start_grace(),
            termination_grace_ms: default_termination_grace(),
            abort_grace_ms: default_abort_grace(),
            recheck_ports_before_test: false,
            log_dir: None,
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            message_size: default_message_size(),
            iterations: default_iterations(),
            timeout_secs: default_timeout_secs(),
            priority: 0,
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            smi_path: default_smi_path(),
            sysfs_root: default_sysfs_root(),
            vendor_id: default_vendor_id(),
            port_activity: PortActivityRule::default(),
            inventory_file: None,
        }
    }
}

impl LinkcheckConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> LinkcheckResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| LinkcheckError::ConfigFile {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(LinkcheckError::io(path, e)),
        }
    }

    /// Benchmark parameters for every request
    pub fn test_params(&self) -> TestParams {
        TestParams {
            kind: self.test.kind.clone(),
            message_size: self.test.message_size,
            iteration_count: self.test.iterations,
            timeout_seconds: self.test.timeout_secs,
        }
    }

    /// Process supervisor settings
    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            benchmark_path: self.runner.benchmark_path.clone(),
            server_address: self.runner.server_address.clone(),
            address_index: self.runner.address_index,
            server_start_grace: self.server_start_grace(),
            termination_grace: self.termination_grace(),
            abort_grace: self.abort_grace(),
        }
    }

    /// Get server start grace as Duration
    pub fn server_start_grace(&self) -> Duration {
        Duration::from_millis(self.runner.server_start_grace_ms)
    }

    /// Get termination grace as Duration
    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.runner.termination_grace_ms)
    }

    /// Get abort grace as Duration
    pub fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.runner.abort_grace_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> LinkcheckResult<()> {
        if self.runner.max_concurrent_tests == 0 {
            return Err(LinkcheckError::invalid_config("max_concurrent_tests", "must be > 0"));
        }

        if self.test.timeout_secs == 0 {
            return Err(LinkcheckError::invalid_config("timeout_secs", "must be > 0"));
        }

        if self.test.iterations == 0 {
            return Err(LinkcheckError::invalid_config("iterations", "must be > 0"));
        }

        if self.test.message_size == 0 {
            return Err(LinkcheckError::invalid_config("message_size", "must be > 0"));
        }

        if self.test.kind.trim().is_empty() {
            return Err(LinkcheckError::invalid_config("kind", "must not be empty"));
        }

        Ok(())
    }
}
