use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::{Config, WorkerConfig};
use crate::db::{DatabaseError, QueueGateway};
use crate::error::HarvestError;
use crate::pipeline::RowProcessor;

use super::pool::WorkerPool;
use super::summary::{BatchSummary, RunSummary, StopReason};

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub batch_size: u64,
    pub max_batches: Option<u64>,
    pub max_runtime: Option<Duration>,
}

impl DriverSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_batches: config.max_batches,
            max_runtime: config.max_runtime_secs.map(Duration::from_secs),
        }
    }
}

/// Claims batches and hands them to the pool until there is nothing left,
/// a limit is hit, or shutdown is requested.
pub struct BatchDriver<G: QueueGateway> {
    gateway: Arc<G>,
    pool: WorkerPool,
    settings: DriverSettings,
    shutdown: Arc<AtomicBool>,
}

impl<G: QueueGateway> BatchDriver<G> {
    pub fn new(gateway: Arc<G>, pool: WorkerPool, settings: DriverSettings) -> Self {
        Self {
            gateway,
            pool,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(gateway: Arc<G>, config: &Config) -> Result<Self, HarvestError> {
        let processor = RowProcessor::from_config(config)?;
        let pool = WorkerPool::new(Arc::new(processor), config.worker.concurrency);
        Ok(Self::new(
            gateway,
            pool,
            DriverSettings::from_config(&config.worker),
        ))
    }

    /// Setting the returned flag stops dispatching new rows. Rows in flight
    /// finish and the rest of the batch is released.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub async fn run(&self) -> Result<RunSummary, DatabaseError> {
        let started = Instant::now();
        let mut totals = BatchSummary::default();
        let mut batches = 0u64;

        info!(
            batch_size = self.settings.batch_size,
            concurrency = self.pool.concurrency(),
            "Starting batch driver"
        );

        let stop_reason = loop {
            if self.shutdown_requested() {
                break StopReason::ShutdownRequested;
            }
            if self.settings.max_batches.is_some_and(|max| batches >= max) {
                break StopReason::BatchLimit;
            }
            if self
                .settings
                .max_runtime
                .is_some_and(|max| started.elapsed() >= max)
            {
                break StopReason::TimeLimit;
            }

            let rows = self.gateway.claim_batch(self.settings.batch_size).await?;
            if rows.is_empty() {
                break StopReason::Drained;
            }

            if self.shutdown_requested() {
                let ids: Vec<_> = rows.iter().map(|row| row.id).collect();
                let released = self.gateway.release(&ids).await?;
                warn!(released, "Shutdown requested, released claimed rows");
                break StopReason::ShutdownRequested;
            }

            batches += 1;
            let report = self
                .pool
                .run_batch(&self.gateway, rows, &self.shutdown)
                .await;
            let batch = report.summary;
            info!(
                batch = batches,
                claimed = batch.claimed,
                succeeded = batch.succeeded,
                transient = batch.transient,
                permanent = batch.permanent,
                duplicates = batch.duplicates,
                lease_lost = batch.lease_lost,
                abandoned = batch.abandoned,
                released = batch.released,
                "Batch complete"
            );
            totals.absorb(&batch);

            if let Some(err) = report.fatal {
                error!(
                    error = %err,
                    batches,
                    succeeded = totals.succeeded,
                    "Storage failure, aborting run"
                );
                return Err(err);
            }
        };

        let summary = RunSummary {
            batches,
            totals,
            elapsed: started.elapsed(),
            stop_reason,
        };
        info!(
            stop_reason = %summary.stop_reason,
            batches = summary.batches,
            claimed = totals.claimed,
            succeeded = totals.succeeded,
            transient = totals.transient,
            permanent = totals.permanent,
            duplicates = totals.duplicates,
            lease_lost = totals.lease_lost,
            released = totals.released,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Run finished"
        );
        Ok(summary)
    }
}
