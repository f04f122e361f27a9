//! Queue table identifier and column names.

use std::fmt;
use std::str::FromStr;

use sea_orm::sea_query::{Alias, IntoTableRef, TableRef};
use sea_orm::DeriveIden;

use super::error::DatabaseError;

/// Columns of the queue table.
#[derive(DeriveIden, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Documents {
    Id,
    PdfUrl,
    RawText,
    Processed,
    ProcessAttempts,
    ProcessedAt,
    LastError,
    DownloadedAt,
    Bytes,
    Mime,
    Filename,
    #[sea_orm(iden = "sha256")]
    Sha256,
    ClaimedBy,
    AvailableAt,
}

/// A validated `name` or `schema.name` identifier.
///
/// Only ASCII letters, digits and underscores are accepted and the first
/// character of each part must not be a digit, so the value can never carry
/// SQL of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTable {
    schema: Option<String>,
    name: String,
}

impl QueueTable {
    pub fn parse(raw: &str) -> Result<Self, DatabaseError> {
        let invalid = |reason: &str| DatabaseError::InvalidIdentifier {
            name: raw.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = raw.trim().split('.').collect();
        let (schema, name) = match parts.as_slice() {
            [name] => (None, *name),
            [schema, name] => (Some(*schema), *name),
            _ => return Err(invalid("expected 'name' or 'schema.name'")),
        };

        for part in schema.iter().chain(std::iter::once(&name)) {
            validate_part(part).map_err(|reason| invalid(reason))?;
        }

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_ref(&self) -> TableRef {
        match &self.schema {
            Some(schema) => (Alias::new(schema.as_str()), Alias::new(self.name.as_str()))
                .into_table_ref(),
            None => Alias::new(self.name.as_str()).into_table_ref(),
        }
    }

    /// Index names are unqualified; Postgres places them in the table's schema.
    pub fn index_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.name, suffix)
    }
}

fn validate_part(part: &str) -> Result<(), &'static str> {
    let mut chars = part.chars();
    match chars.next() {
        None => return Err("empty identifier part"),
        Some(c) if c.is_ascii_digit() => return Err("identifier must not start with a digit"),
        _ => {}
    }
    if part.len() > 63 {
        return Err("identifier longer than 63 characters");
    }
    if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("only ASCII letters, digits and '_' are allowed");
    }
    Ok(())
}

impl FromStr for QueueTable {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for QueueTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}
