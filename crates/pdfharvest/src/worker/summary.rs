use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::db::RecordResult;
use crate::outcome::OutcomeTag;

/// Why the driver stopped claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A claim came back empty.
    Drained,
    BatchLimit,
    TimeLimit,
    ShutdownRequested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Drained => "drained",
            Self::BatchLimit => "batch limit reached",
            Self::TimeLimit => "time limit reached",
            Self::ShutdownRequested => "shutdown requested",
        })
    }
}

/// One row as seen by the pool: what the processor decided and what the
/// gateway did with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowReport {
    pub row_id: Uuid,
    pub outcome: OutcomeTag,
    pub recorded: RecordResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub claimed: u64,
    pub succeeded: u64,
    pub transient: u64,
    pub permanent: u64,
    pub duplicates: u64,
    pub lease_lost: u64,
    /// Rows whose task died before anything was recorded.
    pub abandoned: u64,
    /// Rows handed back to the queue without being dispatched.
    pub released: u64,
}

impl BatchSummary {
    pub fn count(&mut self, report: &RowReport) {
        match report.recorded {
            RecordResult::Recorded(OutcomeTag::Success) => self.succeeded += 1,
            RecordResult::Recorded(OutcomeTag::TransientFailure) => self.transient += 1,
            RecordResult::Recorded(OutcomeTag::PermanentFailure) => self.permanent += 1,
            RecordResult::Duplicate { .. } => self.duplicates += 1,
            RecordResult::LeaseLost => self.lease_lost += 1,
        }
    }

    pub fn absorb(&mut self, other: &BatchSummary) {
        self.claimed += other.claimed;
        self.succeeded += other.succeeded;
        self.transient += other.transient;
        self.permanent += other.permanent;
        self.duplicates += other.duplicates;
        self.lease_lost += other.lease_lost;
        self.abandoned += other.abandoned;
        self.released += other.released;
    }

    /// Rows accounted for one way or another.
    pub fn settled(&self) -> u64 {
        self.succeeded
            + self.transient
            + self.permanent
            + self.duplicates
            + self.lease_lost
            + self.abandoned
            + self.released
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub batches: u64,
    pub totals: BatchSummary,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

fn as_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} batch(es) in {:.1}s: {} claimed, {} succeeded, {} transient, {} permanent, {} duplicates, {} lease lost, {} abandoned, {} released",
            self.stop_reason,
            self.batches,
            self.elapsed.as_secs_f64(),
            self.totals.claimed,
            self.totals.succeeded,
            self.totals.transient,
            self.totals.permanent,
            self.totals.duplicates,
            self.totals.lease_lost,
            self.totals.abandoned,
            self.totals.released,
        )
    }
}
