//! Run aggregation.
//!
//! Workers never touch the summary. Every outcome travels over one result
//! channel to a single [`Aggregator`], which owns all counters and keeps the
//! detail list in the order outcomes arrive.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::SkipReason;
use crate::matcher::SkipRecord;
use crate::report;
use crate::types::{LogicalLink, TestRequest, TestResult, TestStatus};

/// What a worker sends back for a request it took.
#[derive(Debug)]
pub enum Outcome {
    /// The request ran to a terminal status.
    Completed(TestResult),
    /// The request was dropped before running (port recheck failed).
    Skipped {
        /// The request id.
        request_id: String,
        /// Link and reason.
        record: SkipRecord,
    },
    /// The run was aborted before the request started.
    NotStarted(TestRequest),
}

/// Run counters.
///
/// `success + failed + timeout + error + incomplete + skipped_*` always
/// equals `total` for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub submitted: usize,
    pub completed: usize,
    pub success: usize,
    pub failed: usize,
    pub timeout: usize,
    pub error: usize,
    /// Submitted but never started because the run was aborted.
    pub incomplete: usize,
    pub skipped_same_module: usize,
    pub skipped_missing_device: usize,
    pub skipped_inactive_port: usize,
}

impl RunSummary {
    /// Sum of every terminal and skip category.
    pub fn categorized(&self) -> usize {
        self.success
            + self.failed
            + self.timeout
            + self.error
            + self.incomplete
            + self.skipped_same_module
            + self.skipped_missing_device
            + self.skipped_inactive_port
    }

    /// Returns true if the categories add up to `total`.
    pub fn is_consistent(&self) -> bool {
        self.categorized() == self.total
    }

    /// Returns true if every submitted test ran and succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.timeout == 0 && self.error == 0 && self.incomplete == 0
    }
}

/// One entry of the detail list.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetailEntry {
    /// A test that ran.
    Test {
        #[serde(flatten)]
        result: TestResult,
        duration_secs: f64,
    },
    /// A link or request that did not run.
    Skipped {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        link: LogicalLink,
        reason: SkipReason,
        message: String,
    },
}

impl DetailEntry {
    fn skipped(request_id: Option<String>, record: SkipRecord) -> Self {
        DetailEntry::Skipped {
            request_id,
            link: record.link,
            message: record.reason.to_string(),
            reason: record.reason,
        }
    }

    /// Status of a test entry; `None` for skips.
    pub fn status(&self) -> Option<TestStatus> {
        match self {
            DetailEntry::Test { result, .. } => Some(result.status),
            DetailEntry::Skipped { .. } => None,
        }
    }

    /// Request id, if the entry has one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            DetailEntry::Test { result, .. } => Some(&result.request_id),
            DetailEntry::Skipped { request_id, .. } => request_id.as_deref(),
        }
    }
}

/// Single point of accumulation for a run.
#[derive(Debug, Default)]
pub struct Aggregator {
    summary: RunSummary,
    details: Vec<DetailEntry>,
    seen: HashSet<String>,
}

impl Aggregator {
    /// Creates an aggregator for a run over `total` descriptor links.
    pub fn new(total: usize) -> Self {
        Self {
            summary: RunSummary {
                total,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Records requests handed to the queue.
    pub fn record_submitted(&mut self, count: usize) {
        self.summary.submitted += count;
    }

    /// Records a link dropped by matching or the port health filter.
    pub fn record_skip(&mut self, record: SkipRecord) {
        self.count_skip(&record.reason);
        self.details.push(DetailEntry::skipped(None, record));
    }

    /// Applies one worker outcome. A request id is counted at most once.
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed(result) => {
                if !self.first_sighting(&result.request_id) {
                    return;
                }
                self.summary.completed += 1;
                match result.status {
                    TestStatus::Success => self.summary.success += 1,
                    TestStatus::Failed => self.summary.failed += 1,
                    TestStatus::Timeout => self.summary.timeout += 1,
                    TestStatus::Error => self.summary.error += 1,
                }
                debug!(request_id = %result.request_id, status = %result.status, "Recorded result");
                let duration_secs = result.duration_secs();
                self.details.push(DetailEntry::Test { result, duration_secs });
            }
            Outcome::Skipped { request_id, record } => {
                if !self.first_sighting(&request_id) {
                    return;
                }
                self.count_skip(&record.reason);
                self.details.push(DetailEntry::skipped(Some(request_id), record));
            }
            Outcome::NotStarted(request) => {
                if !self.first_sighting(&request.id) {
                    return;
                }
                self.summary.incomplete += 1;
                self.details.push(DetailEntry::skipped(
                    Some(request.id),
                    SkipRecord::new(request.link.logical, SkipReason::Incomplete),
                ));
            }
        }
    }

    fn first_sighting(&mut self, request_id: &str) -> bool {
        if self.seen.insert(request_id.to_string()) {
            true
        } else {
            warn!(request_id = %request_id, "Ignoring second outcome for request");
            false
        }
    }

    fn count_skip(&mut self, reason: &SkipReason) {
        match reason {
            SkipReason::SelfLoopLink { .. } => self.summary.skipped_same_module += 1,
            SkipReason::UnresolvedDevice { .. } => self.summary.skipped_missing_device += 1,
            SkipReason::InactivePort { .. } => self.summary.skipped_inactive_port += 1,
            SkipReason::Incomplete => self.summary.incomplete += 1,
        }
    }

    /// Finishes the run.
    pub fn finish(self) -> (RunSummary, Vec<DetailEntry>) {
        if !self.summary.is_consistent() {
            error!(
                total = self.summary.total,
                categorized = self.summary.categorized(),
                "Run summary categories do not add up"
            );
        }
        (self.summary, self.details)
    }
}

/// Drains the result channel into `aggregator` until every sender is gone.
///
/// When `log_dir` is set, per-test logs are written as results arrive.
pub async fn collect(
    mut results: mpsc::Receiver<Outcome>,
    mut aggregator: Aggregator,
    log_dir: Option<&Path>,
) -> Aggregator {
    while let Some(outcome) = results.recv().await {
        if let (Some(dir), Outcome::Completed(result)) = (log_dir, &outcome) {
            if let Err(e) = report::write_test_logs(dir, result).await {
                warn!(request_id = %result.request_id, error = %e, "Failed to write test logs");
            }
        }
        aggregator.record(outcome);
    }
    aggregator
}
