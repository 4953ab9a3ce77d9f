//! Accelerator fabric link verification.
//!
//! Takes the intended wiring from a connectivity descriptor, resolves it
//! against the device inventory, drops links whose ports are down, and runs a
//! server/client benchmark pair over every remaining link with bounded
//! concurrency.
//!
//! ```text
//! descriptor + inventory -> matcher -> port_health -> queue -> pool
//!     -> supervisor -> classifier -> aggregator -> report
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fabric_inventory::{PortActivityRule, SystemInventory};
//! use fabric_linkcheck::{LinkRunner, ProcessSupervisor, RunOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let runner = LinkRunner::new(
//!     Arc::new(SystemInventory::new(PortActivityRule::Textual)),
//!     Arc::new(ProcessSupervisor::default()),
//!     RunOptions::default(),
//! );
//! let report = runner.run("connectivity.csv".as_ref(), CancellationToken::new()).await?;
//! println!("{}", report.headline());
//! ```

pub mod aggregator;
pub mod classifier;
pub mod config_file;
pub mod descriptor;
pub mod error;
pub mod matcher;
pub mod pool;
pub mod port_health;
pub mod queue;
pub mod report;
pub mod runner;
pub mod supervisor;
pub mod types;

pub use aggregator::{Aggregator, DetailEntry, Outcome, RunSummary};
pub use classifier::{classify, Classification};
pub use config_file::LinkcheckConfig;
pub use descriptor::ConnectivityDescriptor;
pub use error::{InactiveSide, LinkSide, LinkcheckError, LinkcheckResult, SkipReason};
pub use matcher::{match_links, MatchOutcome, SkipRecord};
pub use pool::{ActiveGauge, WorkerPool};
pub use port_health::{check_link, filter_active, HealthOutcome};
pub use queue::RequestQueue;
pub use report::RunReport;
pub use runner::{LinkPlan, LinkRunner, RunOptions};
pub use supervisor::{Execution, ProcessSupervisor, SupervisorConfig, SupervisorState, TestExecutor};
pub use types::{
    LogicalLink, Measurement, Metrics, ModuleEndpoint, TestParams, TestRequest, TestResult, TestStatus,
    ValidatedLink,
};
