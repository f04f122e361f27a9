//! Connectivity probe.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseBackend, FromQueryResult, Statement};
use serde::Serialize;

use super::error::DatabaseError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub backend: String,
    pub server_version: String,
    pub database: Option<String>,
    pub server_time: Option<DateTime<Utc>>,
    #[serde(with = "millis")]
    pub latency: Duration,
}

#[derive(FromQueryResult)]
struct PostgresProbe {
    version: String,
    database: String,
    server_time: DateTime<Utc>,
}

#[derive(FromQueryResult)]
struct SqliteProbe {
    version: String,
}

/// Runs a read-only round trip and reports what answered.
pub async fn check<C: ConnectionTrait>(conn: &C) -> Result<HealthReport, DatabaseError> {
    let backend = conn.get_database_backend();
    let started = Instant::now();

    let report = match backend {
        DatabaseBackend::Postgres => {
            let probe = PostgresProbe::find_by_statement(Statement::from_string(
                backend,
                "SELECT version() AS version, current_database()::text AS database, now() AS server_time",
            ))
            .one(conn)
            .await?
            .ok_or_else(|| sea_orm::DbErr::RecordNotFound("health probe".to_string()))?;
            HealthReport {
                backend: "postgres".to_string(),
                server_version: probe.version,
                database: Some(probe.database),
                server_time: Some(probe.server_time),
                latency: started.elapsed(),
            }
        }
        DatabaseBackend::Sqlite => {
            let probe = SqliteProbe::find_by_statement(Statement::from_string(
                backend,
                "SELECT sqlite_version() AS version",
            ))
            .one(conn)
            .await?
            .ok_or_else(|| sea_orm::DbErr::RecordNotFound("health probe".to_string()))?;
            HealthReport {
                backend: "sqlite".to_string(),
                server_version: probe.version,
                database: None,
                server_time: None,
                latency: started.elapsed(),
            }
        }
        other => return Err(DatabaseError::UnsupportedBackend(format!("{:?}", other))),
    };

    tracing::info!(
        backend = %report.backend,
        latency_ms = report.latency.as_millis() as u64,
        "Database healthcheck passed"
    );
    Ok(report)
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
