//! Idempotent schema bootstrap for the queue table.
//!
//! The table usually already exists and is shared with other writers, so
//! there is no version-tracking table: every step checks the live schema and
//! only runs when its condition holds. Running `run_all` twice is a no-op.

use sea_orm::sea_query::{ColumnDef, Index, Table};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement, Value};

use super::error::DatabaseError;
use super::table::{Documents, QueueTable};

/// A single schema step.
struct Migration {
    version: u32,
    description: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    /// CREATE TABLE IF NOT EXISTS with every column.
    CreateTable,
    /// ALTER TABLE ADD COLUMN, skipped if the column already exists.
    AddColumn { column: Documents },
    /// CREATE INDEX IF NOT EXISTS.
    CreateIndex {
        suffix: &'static str,
        columns: &'static [Documents],
        unique: bool,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_documents_table",
        kind: MigrationKind::CreateTable,
    },
    Migration {
        version: 2,
        description: "add_claimed_by",
        kind: MigrationKind::AddColumn {
            column: Documents::ClaimedBy,
        },
    },
    Migration {
        version: 3,
        description: "add_available_at",
        kind: MigrationKind::AddColumn {
            column: Documents::AvailableAt,
        },
    },
    Migration {
        version: 4,
        description: "unique_sha256",
        kind: MigrationKind::CreateIndex {
            suffix: "sha256_key",
            columns: &[Documents::Sha256],
            unique: true,
        },
    },
    Migration {
        version: 5,
        description: "claim_index",
        kind: MigrationKind::CreateIndex {
            suffix: "claim_idx",
            columns: &[Documents::Processed, Documents::AvailableAt],
            unique: false,
        },
    },
];

const ALL_COLUMNS: &[Documents] = &[
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
];

/// Brings `table` up to the current schema.
pub async fn run_all<C: ConnectionTrait>(conn: &C, table: &QueueTable) -> Result<(), DatabaseError> {
    let backend = conn.get_database_backend();
    match backend {
        DatabaseBackend::Postgres => {
            if let Some(schema) = table.schema() {
                // identifier is validated by QueueTable
                conn.execute_unprepared(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema))
                    .await?;
            }
        }
        DatabaseBackend::Sqlite if table.schema().is_some() => {
            return Err(DatabaseError::UnsupportedBackend(
                "SQLite queue tables must not be schema-qualified".to_string(),
            ));
        }
        DatabaseBackend::Sqlite => {}
        other => return Err(DatabaseError::UnsupportedBackend(format!("{:?}", other))),
    }

    for migration in MIGRATIONS {
        let should_run = match &migration.kind {
            MigrationKind::AddColumn { column } => !column_exists(conn, table, *column).await?,
            MigrationKind::CreateTable | MigrationKind::CreateIndex { .. } => true,
        };

        if !should_run {
            log::debug!(
                "Skipping migration v{} on {} (already applied)",
                migration.version,
                table
            );
            continue;
        }

        log::info!(
            "Running migration v{}: {} on {}",
            migration.version,
            migration.description,
            table
        );

        let statement = build_statement(backend, table, &migration.kind);
        conn.execute(statement)
            .await
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
    }

    Ok(())
}

fn build_statement(backend: DatabaseBackend, table: &QueueTable, kind: &MigrationKind) -> Statement {
    match kind {
        MigrationKind::CreateTable => {
            let mut create = Table::create();
            create.table(table.table_ref()).if_not_exists();
            for column in ALL_COLUMNS {
                create.col(&mut column_def(*column));
            }
            backend.build(&create)
        }
        MigrationKind::AddColumn { column } => {
            let mut alter = Table::alter();
            alter.table(table.table_ref()).add_column(&mut column_def(*column));
            backend.build(&alter)
        }
        MigrationKind::CreateIndex {
            suffix,
            columns,
            unique,
        } => {
            let mut index = Index::create();
            index
                .name(table.index_name(suffix))
                .table(table.table_ref())
                .if_not_exists();
            for column in *columns {
                index.col(*column);
            }
            if *unique {
                index.unique();
            }
            backend.build(&index)
        }
    }
}

fn column_def(column: Documents) -> ColumnDef {
    let mut def = ColumnDef::new(column);
    match column {
        Documents::Id => def.uuid().not_null().primary_key(),
        Documents::PdfUrl => def.text().not_null(),
        Documents::RawText
        | Documents::LastError
        | Documents::Mime
        | Documents::Filename
        | Documents::ClaimedBy => def.text(),
        Documents::Processed => def.boolean().not_null().default(false),
        Documents::ProcessAttempts => def.integer().not_null().default(0),
        Documents::ProcessedAt | Documents::DownloadedAt | Documents::AvailableAt => {
            def.timestamp_with_time_zone()
        }
        Documents::Bytes => def.integer(),
        Documents::Sha256 => def.string_len(64),
    };
    def
}

/// Checks whether `column` exists on `table`.
pub async fn column_exists<C: ConnectionTrait>(
    conn: &C,
    table: &QueueTable,
    column: Documents,
) -> Result<bool, DatabaseError> {
    let backend = conn.get_database_backend();
    let column_name = sea_orm::sea_query::Iden::to_string(&column);
    let statement = match backend {
        DatabaseBackend::Postgres => Statement::from_sql_and_values(
            backend,
            "SELECT COUNT(*) AS n FROM information_schema.columns \
             WHERE table_schema = COALESCE($1, current_schema()) \
             AND table_name = $2 AND column_name = $3",
            [
                Value::from(table.schema().map(str::to_string)),
                Value::from(table.name().to_string()),
                Value::from(column_name),
            ],
        ),
        DatabaseBackend::Sqlite => Statement::from_sql_and_values(
            backend,
            "SELECT COUNT(*) AS n FROM pragma_table_info(?) WHERE name = ?",
            [
                Value::from(table.name().to_string()),
                Value::from(column_name),
            ],
        ),
        other => return Err(DatabaseError::UnsupportedBackend(format!("{:?}", other))),
    };

    let count = match conn.query_one(statement).await? {
        Some(row) => row.try_get::<i64>("", "n")?,
        None => 0,
    };
    Ok(count > 0)
}
