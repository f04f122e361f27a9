//! Database access for the document queue.
//!
//! Everything goes through a pooled sea-orm [`DatabaseConnection`]. The queue
//! table is named at runtime by a [`QueueTable`], so statements are built with
//! sea-query against the [`table::Documents`] column set instead of static
//! entities.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sea_orm::{ConnectOptions, ConnectionTrait, DatabaseConnection};

use crate::config::Config;
use crate::sanitize::redact_db_url;

pub mod error;
pub mod health;
pub mod migrations;
pub mod queue_repo;
pub mod stats_repo;
pub mod table;

pub use error::DatabaseError;
pub use queue_repo::{DocumentQueue, DocumentRecord, DocumentRow, QueueGateway, QueueSettings, RecordResult};
pub use table::{Documents, QueueTable};

/// Pool size for a worker: one connection for claims plus one per in-flight row.
pub fn pool_size(config: &Config) -> u32 {
    let needed = u32::try_from(config.worker.concurrency)
        .unwrap_or(u32::MAX)
        .saturating_add(1);
    config
        .database
        .max_connections
        .map_or(needed, |configured| configured.max(needed))
}

/// Opens a connection pool sized for `config`.
pub async fn connect(url: &SecretString, config: &Config) -> Result<DatabaseConnection, DatabaseError> {
    let max_connections = pool_size(config);
    let mut options = ConnectOptions::new(url.expose_secret().to_string());
    options
        .max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .sqlx_logging(config.database.sqlx_logging)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let conn = sea_orm::Database::connect(options).await?;

    tracing::info!(
        url = %redact_db_url(url.expose_secret()),
        max_connections,
        backend = ?conn.get_database_backend(),
        "Database connected"
    );

    Ok(conn)
}
