use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::secrets::{resolve_secret, SecretError};

/// Env var consulted when the configured URL variable is unset.
pub const FALLBACK_URL_ENV: &str = "NEON_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Direct connection URL. Prefer `url_file` or `url_env_var` outside of
    /// local testing.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_file: Option<String>,
    #[serde(default = "default_url_env_var")]
    pub url_env_var: String,
    /// Pool size; defaults to `worker.concurrency + 1`.
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default = "default_db_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_url_env_var() -> String {
    "DATABASE_URL".to_string()
}

fn default_db_connect_timeout() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_file: None,
            url_env_var: default_url_env_var(),
            max_connections: None,
            connect_timeout_secs: default_db_connect_timeout(),
            sqlx_logging: false,
        }
    }
}

impl DatabaseConfig {
    /// Resolves the connection URL, falling back to `NEON_URL` when the
    /// configured variable is unset.
    pub fn resolve_url(&self) -> Result<SecretString, SecretError> {
        match resolve_secret(
            self.url.as_deref(),
            self.url_file.as_deref(),
            Some(&self.url_env_var),
        ) {
            Err(SecretError::EnvVarNotSet { name }) => {
                resolve_secret(None, None, Some(FALLBACK_URL_ENV))
                    .map_err(|_| SecretError::EnvVarNotSet { name })
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// `name` or `schema.name`.
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
    #[serde(default = "default_permanent_cooldown_secs")]
    pub permanent_cooldown_secs: u64,
    #[serde(default = "default_error_max_len")]
    pub error_max_len: usize,
}

fn default_table() -> String {
    "dev.documents_test".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_lease_secs() -> u64 {
    15 * 60
}

fn default_retry_cooldown_secs() -> u64 {
    10 * 60
}

fn default_permanent_cooldown_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_error_max_len() -> usize {
    800
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            max_attempts: default_max_attempts(),
            lease_secs: default_lease_secs(),
            retry_cooldown_secs: default_retry_cooldown_secs(),
            permanent_cooldown_secs: default_permanent_cooldown_secs(),
            error_max_len: default_error_max_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_pdf_mb")]
    pub max_pdf_mb: f64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: f64,
    #[serde(default = "default_retry_total")]
    pub retry_total: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: f64,
    #[serde(default = "default_retry_backoff_max_secs")]
    pub retry_backoff_max_secs: f64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_pdf_mb() -> f64 {
    30.0
}

fn default_connect_timeout_secs() -> f64 {
    10.0
}

fn default_read_timeout_secs() -> f64 {
    30.0
}

fn default_retry_total() -> u32 {
    3
}

fn default_retry_backoff_secs() -> f64 {
    0.5
}

fn default_retry_backoff_max_secs() -> f64 {
    30.0
}

fn default_user_agent() -> String {
    format!("pdfharvest/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_pdf_mb: default_max_pdf_mb(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            retry_total: default_retry_total(),
            retry_backoff_secs: default_retry_backoff_secs(),
            retry_backoff_max_secs: default_retry_backoff_max_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    pub fn max_bytes(&self) -> u64 {
        (self.max_pdf_mb * 1024.0 * 1024.0) as u64
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    #[serde(default)]
    pub max_batches: Option<u64>,
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
}

fn default_batch_size() -> u64 {
    200
}

fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, 8)
}

fn default_extract_timeout_secs() -> u64 {
    120
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            extract_timeout_secs: default_extract_timeout_secs(),
            max_batches: None,
            max_runtime_secs: None,
        }
    }
}
