//! Database error types.

use thiserror::Error;

/// Errors from database operations. Any of these aborts a run.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error reported by sea-orm or the underlying driver.
    #[error("Database error: {0}")]
    Orm(#[from] sea_orm::DbErr),

    /// The configured queue table is not a safe identifier.
    #[error("Invalid table identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The connected backend is not supported by this operation.
    #[error("Unsupported database backend: {0}")]
    UnsupportedBackend(String),
}
