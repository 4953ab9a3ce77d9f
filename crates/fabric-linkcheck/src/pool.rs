//! Bounded worker pool.
//!
//! A fixed set of worker tasks pulls from the shared [`RequestQueue`] and
//! sends one [`Outcome`] per request over the result channel. Workers only
//! suspend on the queue, on the executor, and (when enabled) on the port
//! recheck query.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fabric_inventory::DeviceInventory;

use crate::aggregator::Outcome;
use crate::error::SkipReason;
use crate::matcher::SkipRecord;
use crate::port_health::check_link;
use crate::queue::RequestQueue;
use crate::supervisor::TestExecutor;
use crate::types::TestRequest;

/// Counts process pairs in flight and remembers the highest count seen.
#[derive(Debug, Default)]
pub struct ActiveGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one pair as running until the guard is dropped.
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the gauge on drop.
pub struct GaugeGuard<'a> {
    gauge: &'a ActiveGauge,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs queued requests on at most `workers` concurrent executors.
pub struct WorkerPool {
    executor: Arc<dyn TestExecutor>,
    workers: usize,
    recheck: Option<Arc<dyn DeviceInventory>>,
    gauge: Arc<ActiveGauge>,
}

impl WorkerPool {
    /// Creates a pool; `workers` is clamped to at least one.
    pub fn new(executor: Arc<dyn TestExecutor>, workers: usize) -> Self {
        Self {
            executor,
            workers: workers.max(1),
            recheck: None,
            gauge: Arc::new(ActiveGauge::new()),
        }
    }

    /// Re-reads port state from `inventory` right before each test.
    pub fn with_port_recheck(mut self, inventory: Arc<dyn DeviceInventory>) -> Self {
        self.recheck = Some(inventory);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn gauge(&self) -> Arc<ActiveGauge> {
        self.gauge.clone()
    }

    /// Processes `queue` until it is closed and empty, or `cancel` fires.
    ///
    /// On cancellation, requests still queued are reported as
    /// [`Outcome::NotStarted`]. `results` is dropped when this returns.
    pub async fn run(&self, queue: Arc<RequestQueue>, results: mpsc::Sender<Outcome>, cancel: CancellationToken) {
        info!(workers = self.workers, queued = queue.len(), "Starting worker pool");

        let mut set = JoinSet::new();
        for worker_id in 0..self.workers {
            let worker = Worker {
                id: worker_id,
                executor: self.executor.clone(),
                recheck: self.recheck.clone(),
                gauge: self.gauge.clone(),
                queue: queue.clone(),
                results: results.clone(),
                cancel: cancel.clone(),
            };
            set.spawn(worker.run());
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        let remaining = queue.drain();
        if !remaining.is_empty() {
            warn!(count = remaining.len(), "Requests left unstarted");
        }
        for request in remaining {
            if results.send(Outcome::NotStarted(request)).await.is_err() {
                break;
            }
        }

        info!(peak_concurrency = self.gauge.peak(), "Worker pool finished");
    }
}

struct Worker {
    id: usize,
    executor: Arc<dyn TestExecutor>,
    recheck: Option<Arc<dyn DeviceInventory>>,
    gauge: Arc<ActiveGauge>,
    queue: Arc<RequestQueue>,
    results: mpsc::Sender<Outcome>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let request = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.queue.pop() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            let outcome = if self.cancel.is_cancelled() {
                Outcome::NotStarted(request)
            } else if let Some(record) = self.recheck_ports(&request).await {
                Outcome::Skipped {
                    request_id: request.id,
                    record,
                }
            } else {
                debug!(worker = self.id, request_id = %request.id, "Running test");
                let _active = self.gauge.enter();
                Outcome::Completed(self.executor.execute(&request, &self.cancel).await)
            };

            if self.results.send(outcome).await.is_err() {
                warn!(worker = self.id, "Result channel closed, stopping worker");
                break;
            }
        }
        debug!(worker = self.id, "Worker exiting");
    }

    async fn recheck_ports(&self, request: &TestRequest) -> Option<SkipRecord> {
        let inventory = self.recheck.as_ref()?;
        match inventory.snapshot().await {
            Ok(snapshot) => check_link(&snapshot, &request.link).map(|side| {
                warn!(request_id = %request.id, inactive = %side, "Port went inactive before test");
                SkipRecord::new(request.link.logical, SkipReason::InactivePort { side })
            }),
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Port recheck failed, running test anyway");
                None
            }
        }
    }
}
