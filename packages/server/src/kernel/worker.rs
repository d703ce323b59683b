//! Generic worker loop for the pipeline stages.
//!
//! Every stage (extraction, normalization, media download) implements
//! `PipelineWorker` and is driven by `run_worker`:
//!
//! ```text
//! run_worker
//!     │
//!     ├─► tick() — claim a batch via atomic conditional update, process it
//!     ├─► empty batch → sleep up to max_poll_interval
//!     ├─► tick error → log, brief sleep, continue (a bad batch never
//!     │                kills the loop)
//!     └─► shutdown token cancelled → drain and return
//! ```
//!
//! Mutual exclusion lives entirely in the store (`FOR UPDATE SKIP LOCKED`
//! claims); any number of these loops can run in parallel processes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Configuration for a worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of items to claim at once
    pub batch_size: i64,
    /// How long to wait when no items are available
    pub max_poll_interval: Duration,
    /// Pause between busy batches
    pub min_poll_interval: Duration,
    /// Worker ID for this instance (logging only)
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_poll_interval: Duration::from_secs(5),
            min_poll_interval: Duration::from_millis(100),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl WorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// A pipeline stage that claims and processes batches of work.
///
/// `tick` must never propagate a single item's failure: one bad item is
/// marked failed in the store, logged, and the batch continues.
#[async_trait::async_trait]
pub trait PipelineWorker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Claim and process up to `batch_size` items.
    ///
    /// Returns the number of items claimed (0 means the queue is idle).
    async fn tick(&self, batch_size: i64) -> Result<usize>;
}

/// Drive a worker until the shutdown token fires.
pub async fn run_worker(
    worker: Arc<dyn PipelineWorker>,
    config: WorkerConfig,
    shutdown: CancellationToken,
) {
    info!(
        worker = worker.name(),
        worker_id = %config.worker_id,
        batch_size = config.batch_size,
        "worker starting"
    );

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match worker.tick(config.batch_size).await {
            Ok(0) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.max_poll_interval) => {}
                }
            }
            Ok(count) => {
                debug!(worker = worker.name(), count, "processed batch");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.min_poll_interval) => {}
                }
            }
            Err(e) => {
                error!(worker = worker.name(), error = %e, "tick failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }

    info!(worker = worker.name(), worker_id = %config.worker_id, "worker stopped");
}
