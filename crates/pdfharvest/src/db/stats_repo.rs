//! Read-only progress report over the queue table.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::sea_query::{
    Alias, Cond, Condition, Expr, Func, NullOrdering, Order, Query, SelectStatement,
};
use sea_orm::{ConnectionTrait, FromQueryResult};
use serde::Serialize;
use uuid::Uuid;

use super::error::DatabaseError;
use super::table::{Documents, QueueTable};
use crate::sanitize::ellipsize;

const SAMPLE_LIMIT: u64 = 10;
const RECENT_ERROR_CHARS: usize = 140;
const PENDING_ERROR_CHARS: usize = 100;

/// Inclusive `process_attempts` ranges of the histogram.
const ATTEMPT_BUCKETS: &[(i32, i32, &str)] = &[
    (0, 0, "0"),
    (1, 1, "1"),
    (2, 2, "2"),
    (3, 3, "3"),
    (4, 4, "4"),
    (5, 5, "5"),
    (6, 10, "6-10"),
    (11, 20, "11-20"),
    (21, i32::MAX, "21+"),
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub table: String,
    pub generated_at: DateTime<Utc>,
    pub totals: Totals,
    pub attempts: Vec<AttemptBucket>,
    pub recent_errors: Vec<ErrorSample>,
    pub mime_types: Vec<MimeCount>,
    pub sizes: SizeStats,
    pub processed_last_24h: i64,
    pub oldest_unprocessed: Vec<PendingSample>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total: i64,
    pub processed: i64,
    pub unprocessed: i64,
    pub with_error: i64,
    pub claimed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptBucket {
    pub label: &'static str,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromQueryResult)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSample {
    pub id: Uuid,
    pub process_attempts: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromQueryResult)]
pub struct MimeCount {
    pub mime: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeStats {
    pub count: i64,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub mean: Option<f64>,
    pub p25: Option<i64>,
    pub p50: Option<i64>,
    pub p75: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromQueryResult)]
#[serde(rename_all = "camelCase")]
pub struct PendingSample {
    pub id: Uuid,
    pub pdf_url: Option<String>,
    pub process_attempts: i32,
    pub last_error: Option<String>,
}

#[derive(FromQueryResult)]
struct CountRow {
    n: i64,
}

#[derive(FromQueryResult)]
struct SizeAggregate {
    n: i64,
    min_bytes: Option<i32>,
    max_bytes: Option<i32>,
    sum_bytes: Option<i64>,
}

#[derive(FromQueryResult)]
struct BytesRow {
    bytes: i32,
}

/// Builds the full report.
pub async fn report<C: ConnectionTrait>(
    conn: &C,
    table: &QueueTable,
) -> Result<StatsReport, DatabaseError> {
    let now = Utc::now();

    let totals = Totals {
        total: count_where(conn, table, Cond::all()).await?,
        processed: count_where(conn, table, processed()).await?,
        unprocessed: count_where(conn, table, unprocessed()).await?,
        with_error: count_where(
            conn,
            table,
            Cond::all().add(Expr::col(Documents::LastError).is_not_null()),
        )
        .await?,
        claimed: count_where(
            conn,
            table,
            Cond::all()
                .add(Expr::col(Documents::ClaimedBy).is_not_null())
                .add(Expr::col(Documents::AvailableAt).gt(now)),
        )
        .await?,
    };

    let mut attempts = Vec::with_capacity(ATTEMPT_BUCKETS.len());
    for (low, high, label) in ATTEMPT_BUCKETS {
        let count = count_where(
            conn,
            table,
            Cond::all().add(Expr::col(Documents::ProcessAttempts).between(*low, *high)),
        )
        .await?;
        attempts.push(AttemptBucket {
            label: *label,
            count,
        });
    }

    let processed_last_24h = count_where(
        conn,
        table,
        processed().add(Expr::col(Documents::ProcessedAt).gte(now - ChronoDuration::hours(24))),
    )
    .await?;

    Ok(StatsReport {
        table: table.to_string(),
        generated_at: now,
        totals,
        attempts,
        recent_errors: recent_errors(conn, table).await?,
        mime_types: mime_types(conn, table).await?,
        sizes: size_stats(conn, table).await?,
        processed_last_24h,
        oldest_unprocessed: oldest_unprocessed(conn, table).await?,
    })
}

fn processed() -> Condition {
    Cond::all().add(Expr::col(Documents::Processed).eq(true))
}

fn unprocessed() -> Condition {
    Cond::any()
        .add(Expr::col(Documents::Processed).is_null())
        .add(Expr::col(Documents::Processed).eq(false))
}

fn select_from(table: &QueueTable) -> SelectStatement {
    let mut select = Query::select();
    select.from(table.table_ref());
    select
}

async fn count_where<C: ConnectionTrait>(
    conn: &C,
    table: &QueueTable,
    condition: Condition,
) -> Result<i64, DatabaseError> {
    let mut select = select_from(table);
    select
        .expr_as(Func::count(Expr::col(Documents::Id)), Alias::new("n"))
        .cond_where(condition);

    let row = CountRow::find_by_statement(conn.get_database_backend().build(&select))
        .one(conn)
        .await?;
    Ok(row.map_or(0, |r| r.n))
}

async fn recent_errors<C: ConnectionTrait>(
    conn: &C,
    table: &QueueTable,
) -> Result<Vec<ErrorSample>, DatabaseError> {
    let mut select = select_from(table);
    select
        .columns([
            Documents::Id,
            Documents::ProcessAttempts,
            Documents::LastError,
            Documents::ProcessedAt,
        ])
        .and_where(Expr::col(Documents::LastError).is_not_null())
        .order_by_with_nulls(Documents::ProcessedAt, Order::Desc, NullOrdering::Last)
        .order_by(Documents::Id, Order::Asc)
        .limit(SAMPLE_LIMIT);

    let mut rows = ErrorSample::find_by_statement(conn.get_database_backend().build(&select))
        .all(conn)
        .await?;
    for row in &mut rows {
        row.last_error = row
            .last_error
            .as_deref()
            .map(|e| ellipsize(e, RECENT_ERROR_CHARS));
    }
    Ok(rows)
}

async fn mime_types<C: ConnectionTrait>(
    conn: &C,
    table: &QueueTable,
) -> Result<Vec<MimeCount>, DatabaseError> {
    let mut select = select_from(table);
    select
        .expr_as(
            Func::coalesce([Expr::col(Documents::Mime).into(), Expr::val("unknown").into()]),
            Alias::new("mime"),
        )
        .expr_as(Func::count(Expr::col(Documents::Id)), Alias::new("count"))
        .group_by_col(Documents::Mime)
        .order_by(Alias::new("count"), Order::Desc)
        .limit(SAMPLE_LIMIT);

    Ok(MimeCount::find_by_statement(conn.get_database_backend().build(&select))
        .all(conn)
        .await?)
}

async fn size_stats<C: ConnectionTrait>(
    conn: &C,
    table: &QueueTable,
) -> Result<SizeStats, DatabaseError> {
    let backend = conn.get_database_backend();
    let sized = || processed().add(Expr::col(Documents::Bytes).is_not_null());

    let mut select = select_from(table);
    select
        .expr_as(Func::count(Expr::col(Documents::Id)), Alias::new("n"))
        .expr_as(Func::min(Expr::col(Documents::Bytes)), Alias::new("min_bytes"))
        .expr_as(Func::max(Expr::col(Documents::Bytes)), Alias::new("max_bytes"))
        .expr_as(Func::sum(Expr::col(Documents::Bytes)), Alias::new("sum_bytes"))
        .cond_where(sized());

    let Some(aggregate) = SizeAggregate::find_by_statement(backend.build(&select))
        .one(conn)
        .await?
    else {
        return Ok(SizeStats::default());
    };
    if aggregate.n == 0 {
        return Ok(SizeStats::default());
    }

    let mut stats = SizeStats {
        count: aggregate.n,
        min: aggregate.min_bytes.map(i64::from),
        max: aggregate.max_bytes.map(i64::from),
        mean: aggregate.sum_bytes.map(|sum| sum as f64 / aggregate.n as f64),
        ..SizeStats::default()
    };

    for (percent, slot) in [(25, &mut stats.p25), (50, &mut stats.p50), (75, &mut stats.p75)] {
        let offset = nearest_rank(aggregate.n, percent) - 1;
        let mut select = select_from(table);
        select
            .column(Documents::Bytes)
            .cond_where(sized())
            .order_by(Documents::Bytes, Order::Asc)
            .limit(1)
            .offset(offset);
        *slot = BytesRow::find_by_statement(backend.build(&select))
            .one(conn)
            .await?
            .map(|row| i64::from(row.bytes));
    }

    Ok(stats)
}

/// 1-based nearest-rank index of the `percent`th percentile among `n` values.
fn nearest_rank(n: i64, percent: i64) -> u64 {
    let rank = (percent * n + 99) / 100;
    rank.clamp(1, n.max(1)) as u64
}

async fn oldest_unprocessed<C: ConnectionTrait>(
    conn: &C,
    table: &QueueTable,
) -> Result<Vec<PendingSample>, DatabaseError> {
    let mut select = select_from(table);
    select
        .columns([
            Documents::Id,
            Documents::PdfUrl,
            Documents::ProcessAttempts,
            Documents::LastError,
        ])
        .cond_where(unprocessed())
        .order_by(Documents::Id, Order::Asc)
        .limit(SAMPLE_LIMIT);

    let mut rows = PendingSample::find_by_statement(conn.get_database_backend().build(&select))
        .all(conn)
        .await?;
    for row in &mut rows {
        row.last_error = row
            .last_error
            .as_deref()
            .map(|e| ellipsize(e, PENDING_ERROR_CHARS));
    }
    Ok(rows)
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        let percent = if t.total > 0 {
            t.processed as f64 * 100.0 / t.total as f64
        } else {
            0.0
        };

        writeln!(f, "Queue {} at {}", self.table, self.generated_at.to_rfc3339())?;
        writeln!(f)?;
        writeln!(f, "Totals")?;
        writeln!(f, "  total        {:>10}", t.total)?;
        writeln!(f, "  processed    {:>10} ({:.1}%)", t.processed, percent)?;
        writeln!(f, "  unprocessed  {:>10}", t.unprocessed)?;
        writeln!(f, "  with error   {:>10}", t.with_error)?;
        writeln!(f, "  claimed now  {:>10}", t.claimed)?;
        writeln!(f, "  last 24h     {:>10}", self.processed_last_24h)?;

        writeln!(f)?;
        writeln!(f, "Attempts")?;
        for bucket in &self.attempts {
            writeln!(f, "  {:<6} {:>10}", bucket.label, bucket.count)?;
        }

        writeln!(f)?;
        writeln!(f, "MIME types")?;
        for mime in &self.mime_types {
            writeln!(f, "  {:<30} {:>10}", mime.mime, mime.count)?;
        }

        let s = &self.sizes;
        writeln!(f)?;
        writeln!(f, "Sizes (processed, bytes)")?;
        if s.count == 0 {
            writeln!(f, "  none")?;
        } else {
            let show = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
            writeln!(
                f,
                "  n={} min={} p25={} p50={} p75={} max={} mean={:.0}",
                s.count,
                show(s.min),
                show(s.p25),
                show(s.p50),
                show(s.p75),
                show(s.max),
                s.mean.unwrap_or_default()
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Recent errors")?;
        for e in &self.recent_errors {
            writeln!(
                f,
                "  {} attempts={} {}",
                e.id,
                e.process_attempts,
                e.last_error.as_deref().unwrap_or_default()
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Oldest unprocessed")?;
        for p in &self.oldest_unprocessed {
            writeln!(
                f,
                "  {} attempts={} {} {}",
                p.id,
                p.process_attempts,
                p.pdf_url.as_deref().unwrap_or("<no url>"),
                p.last_error.as_deref().unwrap_or_default()
            )?;
        }
        Ok(())
    }
}
