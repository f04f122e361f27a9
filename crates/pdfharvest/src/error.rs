use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value '{value}' for environment variable {name}: {reason}")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },
}

/// Errors from downloading a document.
///
/// `is_permanent` decides whether a row that failed with this error should be
/// retried on a later attempt.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("response body exceeded {limit} bytes (observed {observed})")]
    SizeExceeded { limit: u64, observed: u64 },

    #[error("content is not a PDF (declared {}, detected {detected})", declared.as_deref().unwrap_or("none"))]
    UnacceptedMime {
        declared: Option<String>,
        detected: String,
    },

    #[error("HTTP status {status} after {attempts} attempt(s)")]
    HttpStatus { status: u16, attempts: u32 },

    #[error("network error after {attempts} attempt(s): {reason}")]
    NetworkTransient { reason: String, attempts: u32 },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Permanent errors will fail the same way on every attempt.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidUrl { .. } | Self::SizeExceeded { .. } | Self::UnacceptedMime { .. } => {
                true
            }
            Self::HttpStatus { status, .. } => !is_retryable_status(*status),
            Self::NetworkTransient { .. } | Self::Client(_) => false,
        }
    }
}

/// 408, 429 and every 5xx are worth another try.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("malformed PDF: {0}")]
    Malformed(String),

    #[error("PDF is encrypted")]
    Encrypted,

    #[error("PDF has no pages")]
    NoPages,

    #[error("PDF contains no extractable text")]
    NoText,

    #[error("failed to extract page {page}: {reason}")]
    Page { page: u32, reason: String },

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("extractor crashed: {0}")]
    Crashed(String),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
