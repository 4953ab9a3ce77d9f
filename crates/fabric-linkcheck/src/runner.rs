//! Run orchestration.
//!
//! [`LinkRunner::plan`] turns a descriptor and a fresh inventory snapshot into
//! the set of links to test; [`LinkRunner::execute`] queues one request per
//! active link, runs them on the worker pool and aggregates the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use fabric_inventory::DeviceInventory;

use crate::aggregator::{collect, Aggregator};
use crate::descriptor::ConnectivityDescriptor;
use crate::error::{LinkcheckError, LinkcheckResult};
use crate::matcher::{match_links, SkipRecord};
use crate::pool::WorkerPool;
use crate::port_health::filter_active;
use crate::queue::RequestQueue;
use crate::report::RunReport;
use crate::supervisor::TestExecutor;
use crate::types::{LogicalLink, TestParams, TestRequest, ValidatedLink};

/// Per-run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub params: TestParams,
    pub priority: i32,
    pub max_concurrent_tests: usize,
    /// Re-read port state before each test.
    pub recheck_ports: bool,
    /// Only links with an end on this module.
    pub module_filter: Option<u32>,
    /// Per-test log directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            params: TestParams::default(),
            priority: 0,
            max_concurrent_tests: 5,
            recheck_ports: false,
            module_filter: None,
            log_dir: None,
        }
    }
}

/// Links selected for testing and everything dropped on the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkPlan {
    /// Descriptor links considered (after the module filter).
    pub total: usize,
    pub active: Vec<ValidatedLink>,
    pub skipped: Vec<SkipRecord>,
    pub skipped_same_module: usize,
    pub skipped_missing_device: usize,
    pub skipped_inactive_port: usize,
}

/// Drives one verification run.
pub struct LinkRunner {
    inventory: Arc<dyn DeviceInventory>,
    executor: Arc<dyn TestExecutor>,
    options: RunOptions,
}

impl LinkRunner {
    pub fn new(inventory: Arc<dyn DeviceInventory>, executor: Arc<dyn TestExecutor>, options: RunOptions) -> Self {
        Self {
            inventory,
            executor,
            options,
        }
    }

    /// Loads the descriptor at `path`, plans and executes.
    pub async fn run(&self, path: &Path, cancel: CancellationToken) -> LinkcheckResult<RunReport> {
        let descriptor = ConnectivityDescriptor::load(path)?;
        let plan = self.plan(&descriptor).await?;
        Ok(self.execute(plan, cancel).await)
    }

    /// Matches and filters the descriptor against a fresh snapshot.
    ///
    /// Fails if the inventory cannot be queried or reports no devices.
    #[instrument(skip_all, fields(inventory = self.inventory.name()))]
    pub async fn plan(&self, descriptor: &ConnectivityDescriptor) -> LinkcheckResult<LinkPlan> {
        descriptor.report_duplicates();

        let snapshot = self.inventory.snapshot().await?;
        if snapshot.is_empty() {
            return Err(LinkcheckError::EmptyInventory {
                inventory: self.inventory.name().to_string(),
            });
        }

        let links: Vec<LogicalLink> = match self.options.module_filter {
            Some(module_id) => descriptor
                .links
                .iter()
                .filter(|l| l.touches_module(module_id))
                .copied()
                .collect(),
            None => descriptor.links.clone(),
        };

        let matched = match_links(&links, &snapshot);
        let skipped_same_module = matched.skipped_same_module;
        let skipped_missing_device = matched.skipped_missing_device();
        let health = filter_active(matched.validated, &snapshot);

        let mut skipped = matched.skipped;
        let skipped_inactive_port = health.skipped.len();
        skipped.extend(health.skipped);

        info!(
            links = links.len(),
            active = health.active.len(),
            skipped = skipped.len(),
            "Link plan ready"
        );

        Ok(LinkPlan {
            total: links.len(),
            active: health.active,
            skipped,
            skipped_same_module,
            skipped_missing_device,
            skipped_inactive_port,
        })
    }

    /// One request per link, ids `test_<n>_<unix millis>`.
    pub fn requests(&self, links: &[ValidatedLink]) -> Vec<TestRequest> {
        links
            .iter()
            .enumerate()
            .map(|(i, link)| TestRequest {
                id: format!("test_{}_{}", i, Utc::now().timestamp_millis()),
                link: link.clone(),
                params: self.options.params.clone(),
                priority: self.options.priority,
            })
            .collect()
    }

    /// Runs every active link of `plan` and aggregates the results.
    #[instrument(skip_all, fields(active = plan.active.len()))]
    pub async fn execute(&self, plan: LinkPlan, cancel: CancellationToken) -> RunReport {
        let started_at = Utc::now();

        let mut aggregator = Aggregator::new(plan.total);
        for record in plan.skipped {
            aggregator.record_skip(record);
        }

        let queue = Arc::new(RequestQueue::new());
        let requests = self.requests(&plan.active);
        aggregator.record_submitted(requests.len());
        for request in requests {
            queue.push(request);
        }
        queue.close();

        let mut pool = WorkerPool::new(self.executor.clone(), self.options.max_concurrent_tests);
        if self.options.recheck_ports {
            pool = pool.with_port_recheck(self.inventory.clone());
        }

        let (tx, rx) = mpsc::channel(pool.workers() * 2);
        let (_, aggregator) = tokio::join!(
            pool.run(queue, tx, cancel.clone()),
            collect(rx, aggregator, self.options.log_dir.as_deref())
        );
        let (summary, details) = aggregator.finish();

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            aborted: cancel.is_cancelled(),
            max_concurrent_tests: pool.workers(),
            peak_concurrency: pool.gauge().peak(),
            summary,
            details,
        };
        info!("{}", report.headline());
        report
    }
}
