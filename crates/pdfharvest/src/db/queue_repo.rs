//! Claim and record operations on the document queue.
//!
//! A claim is one short transaction: select claimable rows with
//! `FOR UPDATE SKIP LOCKED`, stamp them with this queue's claim token and a
//! lease deadline, commit. Outcomes are written later in their own
//! transaction, guarded by the token, so a row whose lease expired and was
//! claimed elsewhere is never written twice.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{
    Cond, Condition, Expr, Func, LockBehavior, LockType, Order, Query, SimpleExpr, UpdateStatement,
};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, FromQueryResult, SqlErr,
    TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::DatabaseError;
use super::table::{Documents, QueueTable};
use crate::config::QueueConfig;
use crate::outcome::{FailureKind, Outcome, OutcomeTag, SuccessRecord};
use crate::sanitize::truncate_chars;

/// The columns a worker needs to process a claimed row.
#[derive(Debug, Clone, PartialEq, FromQueryResult)]
pub struct DocumentRow {
    pub id: Uuid,
    pub pdf_url: Option<String>,
    pub process_attempts: i32,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub filename: Option<String>,
}

/// A full queue row.
#[derive(Debug, Clone, PartialEq, FromQueryResult, Serialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub pdf_url: Option<String>,
    pub raw_text: Option<String>,
    pub processed: Option<bool>,
    pub process_attempts: i32,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub bytes: Option<i32>,
    pub mime: Option<String>,
    pub filename: Option<String>,
    pub sha256: Option<String>,
    pub claimed_by: Option<String>,
    pub available_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromQueryResult)]
struct IdRow {
    id: Uuid,
}

/// What `record_outcome` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordResult {
    /// The outcome was written as given.
    Recorded(OutcomeTag),
    /// The digest already belongs to another row; a permanent failure was
    /// written instead.
    Duplicate { existing: Option<Uuid> },
    /// This queue no longer holds the row. Nothing was written.
    LeaseLost,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_attempts: i32,
    pub lease: Duration,
    pub retry_cooldown: Duration,
    pub permanent_cooldown: Duration,
    pub error_max_len: usize,
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: i32::try_from(config.max_attempts).unwrap_or(i32::MAX),
            lease: Duration::from_secs(config.lease_secs),
            retry_cooldown: Duration::from_secs(config.retry_cooldown_secs),
            permanent_cooldown: Duration::from_secs(config.permanent_cooldown_secs),
            error_max_len: config.error_max_len,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

/// Storage operations the batch driver depends on.
#[async_trait]
pub trait QueueGateway: Send + Sync + 'static {
    /// Claims up to `limit` rows. Never waits on rows locked by someone else;
    /// an empty result means nothing is claimable right now.
    async fn claim_batch(&self, limit: u64) -> Result<Vec<DocumentRow>, DatabaseError>;

    /// Writes the outcome of a claimed row.
    async fn record_outcome(
        &self,
        row_id: Uuid,
        outcome: &Outcome,
    ) -> Result<RecordResult, DatabaseError>;

    /// Hands claimed rows back without counting an attempt.
    async fn release(&self, row_ids: &[Uuid]) -> Result<u64, DatabaseError>;
}

/// The queue table as seen by one claimer.
pub struct DocumentQueue {
    conn: DatabaseConnection,
    table: QueueTable,
    settings: QueueSettings,
    token: String,
}

impl DocumentQueue {
    pub fn new(conn: DatabaseConnection, table: QueueTable, settings: QueueSettings) -> Self {
        let token = format!("pid{}-{}", std::process::id(), Uuid::new_v4().simple());
        Self {
            conn,
            table,
            settings,
            token,
        }
    }

    pub fn claim_token(&self) -> &str {
        &self.token
    }

    pub fn table(&self) -> &QueueTable {
        &self.table
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn backend(&self) -> DatabaseBackend {
        self.conn.get_database_backend()
    }

    fn claimable(&self, now: DateTime<Utc>) -> Condition {
        Cond::all()
            .add(
                Cond::any()
                    .add(Expr::col(Documents::Processed).is_null())
                    .add(Expr::col(Documents::Processed).eq(false)),
            )
            .add(Expr::col(Documents::ProcessAttempts).lt(self.settings.max_attempts))
            .add(
                Cond::any()
                    .add(Expr::col(Documents::AvailableAt).is_null())
                    .add(Expr::col(Documents::AvailableAt).lte(now)),
            )
    }

    /// An UPDATE on one row that only matches while this queue holds it.
    fn guarded_update(&self, row_id: Uuid) -> UpdateStatement {
        let mut update = Query::update();
        update
            .table(self.table.table_ref())
            .and_where(Expr::col(Documents::Id).eq(row_id))
            .and_where(Expr::col(Documents::ClaimedBy).eq(self.token.as_str()));
        update
    }

    /// Reads one row by id.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<DocumentRecord>, DatabaseError> {
        let mut select = Query::select();
        select
            .columns([
                Documents::Id,
                Documents::PdfUrl,
                Documents::RawText,
                Documents::Processed,
                Documents::ProcessAttempts,
                Documents::ProcessedAt,
                Documents::LastError,
                Documents::DownloadedAt,
                Documents::Bytes,
                Documents::Mime,
                Documents::Filename,
                Documents::Sha256,
                Documents::ClaimedBy,
                Documents::AvailableAt,
            ])
            .from(self.table.table_ref())
            .and_where(Expr::col(Documents::Id).eq(id));

        let record = DocumentRecord::find_by_statement(self.backend().build(&select))
            .one(&self.conn)
            .await?;
        Ok(record)
    }

    async fn record_success(
        &self,
        row_id: Uuid,
        record: &SuccessRecord,
        now: DateTime<Utc>,
    ) -> Result<RecordResult, DatabaseError> {
        let bytes = i32::try_from(record.bytes).unwrap_or(i32::MAX);
        let mut update = self.guarded_update(row_id);
        update.values([
            (Documents::RawText, record.raw_text.as_str().into()),
            (Documents::Bytes, bytes.into()),
            (Documents::Mime, record.mime.as_str().into()),
            (
                Documents::Filename,
                coalesce(Documents::Filename, record.filename.clone()),
            ),
            (Documents::Sha256, record.sha256.as_str().into()),
            (
                Documents::DownloadedAt,
                coalesce(Documents::DownloadedAt, Some(record.downloaded_at)),
            ),
            (Documents::Processed, true.into()),
            (Documents::ProcessedAt, now.into()),
            (
                Documents::ProcessAttempts,
                Expr::col(Documents::ProcessAttempts).add(1),
            ),
            (Documents::LastError, Option::<String>::None.into()),
            (Documents::ClaimedBy, Option::<String>::None.into()),
            (Documents::AvailableAt, Option::<DateTime<Utc>>::None.into()),
        ]);

        let txn = self.conn.begin().await?;
        match txn.execute(self.backend().build(&update)).await {
            Ok(result) => {
                txn.commit().await?;
                if result.rows_affected() == 0 {
                    warn!(row_id = %row_id, "Lease lost before success was recorded");
                    return Ok(RecordResult::LeaseLost);
                }
                Ok(RecordResult::Recorded(OutcomeTag::Success))
            }
            Err(err) if is_unique_violation(&err) => {
                txn.rollback().await?;
                let existing = self.digest_owner(&record.sha256, row_id).await?;
                let message = match existing {
                    Some(owner) => format!(
                        "{}: sha256 {} already stored by row {}",
                        FailureKind::DuplicateContent,
                        record.sha256,
                        owner
                    ),
                    None => format!(
                        "{}: sha256 {} already stored",
                        FailureKind::DuplicateContent,
                        record.sha256
                    ),
                };
                let written = self
                    .write_failure(row_id, &message, self.settings.permanent_cooldown, now)
                    .await?;
                if written == 0 {
                    return Ok(RecordResult::LeaseLost);
                }
                Ok(RecordResult::Duplicate { existing })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_failure(
        &self,
        row_id: Uuid,
        message: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let mut update = self.guarded_update(row_id);
        update.values([
            (
                Documents::ProcessAttempts,
                Expr::col(Documents::ProcessAttempts).add(1),
            ),
            (
                Documents::LastError,
                truncate_chars(message, self.settings.error_max_len).into(),
            ),
            (Documents::Processed, false.into()),
            (Documents::ClaimedBy, Option::<String>::None.into()),
            (Documents::AvailableAt, deadline(now, cooldown).into()),
        ]);

        let result = self.conn.execute(self.backend().build(&update)).await?;
        Ok(result.rows_affected())
    }

    async fn digest_owner(&self, sha256: &str, row_id: Uuid) -> Result<Option<Uuid>, DatabaseError> {
        let mut select = Query::select();
        select
            .column(Documents::Id)
            .from(self.table.table_ref())
            .and_where(Expr::col(Documents::Sha256).eq(sha256))
            .and_where(Expr::col(Documents::Id).ne(row_id))
            .limit(1);

        let owner = IdRow::find_by_statement(self.backend().build(&select))
            .one(&self.conn)
            .await?;
        Ok(owner.map(|row| row.id))
    }
}

#[async_trait]
impl QueueGateway for DocumentQueue {
    async fn claim_batch(&self, limit: u64) -> Result<Vec<DocumentRow>, DatabaseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let backend = self.backend();

        let mut select = Query::select();
        select
            .columns([
                Documents::Id,
                Documents::PdfUrl,
                Documents::ProcessAttempts,
                Documents::DownloadedAt,
                Documents::Filename,
            ])
            .from(self.table.table_ref())
            .cond_where(self.claimable(now))
            .order_by(Documents::Id, Order::Asc)
            .limit(limit);
        if backend == DatabaseBackend::Postgres {
            select.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked);
        }

        let txn = self.conn.begin().await?;
        let rows = DocumentRow::find_by_statement(backend.build(&select))
            .all(&txn)
            .await?;

        if !rows.is_empty() {
            let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
            let mut update = Query::update();
            update
                .table(self.table.table_ref())
                .values([
                    (Documents::ClaimedBy, self.token.as_str().into()),
                    (
                        Documents::AvailableAt,
                        deadline(now, self.settings.lease).into(),
                    ),
                ])
                .and_where(Expr::col(Documents::Id).is_in(ids));
            txn.execute(backend.build(&update)).await?;
        }
        txn.commit().await?;

        debug!(claimed = rows.len(), limit, table = %self.table, "Claimed batch");
        Ok(rows)
    }

    async fn record_outcome(
        &self,
        row_id: Uuid,
        outcome: &Outcome,
    ) -> Result<RecordResult, DatabaseError> {
        let now = Utc::now();
        let (cooldown, tag) = match outcome {
            Outcome::Success(record) => return self.record_success(row_id, record, now).await,
            Outcome::TransientFailure { .. } => {
                (self.settings.retry_cooldown, OutcomeTag::TransientFailure)
            }
            Outcome::PermanentFailure { .. } => {
                (self.settings.permanent_cooldown, OutcomeTag::PermanentFailure)
            }
        };

        let message = outcome.error_text().unwrap_or_default();
        let written = self.write_failure(row_id, &message, cooldown, now).await?;
        if written == 0 {
            warn!(row_id = %row_id, "Lease lost before failure was recorded");
            return Ok(RecordResult::LeaseLost);
        }
        Ok(RecordResult::Recorded(tag))
    }

    async fn release(&self, row_ids: &[Uuid]) -> Result<u64, DatabaseError> {
        if row_ids.is_empty() {
            return Ok(0);
        }

        let mut update = Query::update();
        update
            .table(self.table.table_ref())
            .values([
                (Documents::ClaimedBy, Option::<String>::None.into()),
                (Documents::AvailableAt, Option::<DateTime<Utc>>::None.into()),
            ])
            .and_where(Expr::col(Documents::Id).is_in(row_ids.iter().copied()))
            .and_where(Expr::col(Documents::ClaimedBy).eq(self.token.as_str()));

        let result = self.conn.execute(self.backend().build(&update)).await?;
        debug!(released = result.rows_affected(), "Released claimed rows");
        Ok(result.rows_affected())
    }
}

/// `COALESCE(column, value)`: keeps an existing value.
fn coalesce<V>(column: Documents, value: V) -> SimpleExpr
where
    V: Into<sea_orm::Value>,
{
    Func::coalesce([Expr::col(column).into(), Expr::val(value).into()]).into()
}

fn deadline(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
