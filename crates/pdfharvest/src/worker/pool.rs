use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::db::{DatabaseError, DocumentRow, QueueGateway};
use crate::pipeline::RowProcessor;

use super::summary::{BatchSummary, RowReport};

/// Everything the pool learned from one batch.
#[derive(Debug)]
pub struct BatchReport {
    pub summary: BatchSummary,
    /// The first storage failure, if any. No row was dispatched after it.
    pub fatal: Option<DatabaseError>,
}

/// Runs the rows of a batch as tokio tasks, at most `concurrency` at a time.
pub struct WorkerPool {
    processor: Arc<RowProcessor>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(processor: Arc<RowProcessor>, concurrency: usize) -> Self {
        Self {
            processor,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes and records the rows of a batch.
    ///
    /// Dispatch stops at the first storage failure or once `shutdown` is set.
    /// Rows already in flight finish; the rest are released back to the queue.
    pub async fn run_batch<G: QueueGateway>(
        &self,
        gateway: &Arc<G>,
        rows: Vec<DocumentRow>,
        shutdown: &AtomicBool,
    ) -> BatchReport {
        let mut summary = BatchSummary {
            claimed: rows.len() as u64,
            ..Default::default()
        };
        let mut fatal = None;
        let mut tasks: JoinSet<Result<RowReport, DatabaseError>> = JoinSet::new();
        let mut pending = rows.into_iter();

        loop {
            while fatal.is_none()
                && !shutdown.load(Ordering::SeqCst)
                && tasks.len() < self.concurrency
            {
                let Some(row) = pending.next() else { break };
                let processor = Arc::clone(&self.processor);
                let gateway = Arc::clone(gateway);
                let span = info_span!(
                    "row",
                    row_id = %row.id,
                    attempt = row.process_attempts + 1,
                    filename = row.filename.as_deref().unwrap_or("")
                );
                tasks.spawn(
                    async move { process_row(&processor, gateway.as_ref(), row).await }
                        .instrument(span),
                );
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(Ok(report)) => summary.count(&report),
                Ok(Err(err)) => {
                    error!(error = %err, "Failed to record row outcome");
                    summary.abandoned += 1;
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(join_err) => {
                    // the lease expires and the row is claimed again later
                    error!(error = %join_err, "Row task died");
                    summary.abandoned += 1;
                }
            }
        }

        let undispatched: Vec<Uuid> = pending.map(|row| row.id).collect();
        if !undispatched.is_empty() {
            summary.released = undispatched.len() as u64;
            release_undispatched(gateway.as_ref(), &undispatched).await;
        }

        BatchReport { summary, fatal }
    }
}

/// Hands rows back to the queue. A failure leaves them to lease expiry.
async fn release_undispatched<G: QueueGateway>(gateway: &G, row_ids: &[Uuid]) {
    match gateway.release(row_ids).await {
        Ok(released) => warn!(
            released,
            undispatched = row_ids.len(),
            "Stopped dispatching, released remaining rows"
        ),
        Err(err) => warn!(
            error = %err,
            undispatched = row_ids.len(),
            "Failed to release remaining rows, leaving them to lease expiry"
        ),
    }
}

async fn process_row<G: QueueGateway>(
    processor: &RowProcessor,
    gateway: &G,
    row: DocumentRow,
) -> Result<RowReport, DatabaseError> {
    let outcome = processor.process(&row).await;
    let recorded = gateway
        .record_outcome(row.id, &outcome)
        .instrument(info_span!("record", outcome = ?outcome.tag()))
        .await?;
    debug!(recorded = ?recorded, "Row settled");

    Ok(RowReport {
        row_id: row.id,
        outcome: outcome.tag(),
        recorded,
    })
}
