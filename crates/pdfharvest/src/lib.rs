pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod outcome;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod secrets;
pub mod telemetry;
pub mod worker;

pub use config::{load_config, Config};
pub use db::{DatabaseError, DocumentQueue, QueueGateway, QueueSettings, QueueTable, RecordResult};
pub use error::{ConfigError, ExtractionError, FetchError, HarvestError, Result};
pub use fetch::{BackoffPolicy, ContentFetcher, FetchLimits, FetchedContent};
pub use outcome::{FailureKind, Outcome, OutcomeTag, SuccessRecord};
pub use pipeline::{PipelineConfig, RowProcessor};
pub use processor::{PdfExtractor, TextExtractor};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use worker::{BatchDriver, DriverSettings, RunSummary, StopReason, WorkerPool};
