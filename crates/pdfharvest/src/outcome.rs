//! The result of processing one row, as handed to the storage layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a row failed. Stored as the prefix of `last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    InvalidUrl,
    SizeExceeded,
    UnacceptedMime,
    HttpStatus,
    NetworkTransient,
    Extraction,
    DuplicateContent,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "InvalidUrl",
            Self::SizeExceeded => "SizeExceeded",
            Self::UnacceptedMime => "UnacceptedMime",
            Self::HttpStatus => "HttpStatus",
            Self::NetworkTransient => "NetworkTransient",
            Self::Extraction => "Extraction",
            Self::DuplicateContent => "DuplicateContent",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything written back for a successfully processed row.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessRecord {
    pub raw_text: String,
    pub bytes: u64,
    pub mime: String,
    pub filename: Option<String>,
    /// Lowercase hex SHA-256 of the downloaded bytes.
    pub sha256: String,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(SuccessRecord),
    /// Worth retrying after the retry cooldown.
    TransientFailure { kind: FailureKind, message: String },
    /// Will fail the same way again; parked for the permanent cooldown.
    PermanentFailure { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutcomeTag {
    Success,
    TransientFailure,
    PermanentFailure,
}

impl Outcome {
    pub fn tag(&self) -> OutcomeTag {
        match self {
            Self::Success(_) => OutcomeTag::Success,
            Self::TransientFailure { .. } => OutcomeTag::TransientFailure,
            Self::PermanentFailure { .. } => OutcomeTag::PermanentFailure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::TransientFailure { kind, .. } | Self::PermanentFailure { kind, .. } => Some(*kind),
        }
    }

    /// The `last_error` text for a failure.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Self::Success(_) => None,
            Self::TransientFailure { kind, message } | Self::PermanentFailure { kind, message } => {
                Some(format!("{}: {}", kind, message))
            }
        }
    }
}
