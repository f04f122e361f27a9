use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info_span, warn, Instrument};

use crate::config::Config;
use crate::db::DocumentRow;
use crate::error::{FetchError, HarvestError};
use crate::fetch::{ContentFetcher, FetchLimits};
use crate::outcome::{FailureKind, Outcome, SuccessRecord};
use crate::processor::{extract_isolated, PdfExtractor, TextExtractor};
use crate::sanitize::{redact_url, truncate_chars};

use super::config::PipelineConfig;

/// Turns one claimed row into an [`Outcome`]. Never touches the database.
pub struct RowProcessor {
    config: Arc<PipelineConfig>,
    fetcher: Arc<ContentFetcher>,
    extractor: Arc<dyn TextExtractor>,
}

impl RowProcessor {
    pub fn new(
        config: Arc<PipelineConfig>,
        fetcher: Arc<ContentFetcher>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            config,
            fetcher,
            extractor,
        }
    }

    /// Production wiring: reqwest fetcher and the lopdf extractor.
    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        let fetcher = ContentFetcher::new(FetchLimits::from_config(&config.fetch))?;
        Ok(Self::new(
            Arc::new(PipelineConfig::from_config(config)),
            Arc::new(fetcher),
            Arc::new(PdfExtractor::new()),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn process(&self, row: &DocumentRow) -> Outcome {
        let outcome = self.run_steps(row).await;
        self.finalize(row, outcome)
    }

    async fn run_steps(&self, row: &DocumentRow) -> Outcome {
        let url = match row.pdf_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Outcome::PermanentFailure {
                    kind: FailureKind::InvalidUrl,
                    message: "row has no pdf_url".to_string(),
                }
            }
        };

        let fetched = match self
            .fetcher
            .fetch(url)
            .instrument(info_span!("fetch", url = %redact_url(url)))
            .await
        {
            Ok(fetched) => fetched,
            Err(err) => return fetch_failure(&err),
        };

        let sha256 = {
            let _step = info_span!("hash", bytes = fetched.bytes.len()).entered();
            hex::encode(Sha256::digest(&fetched.bytes))
        };

        let bytes = Arc::new(fetched.bytes);
        let raw_text = match extract_isolated(
            Arc::clone(&self.extractor),
            Arc::clone(&bytes),
            self.config.extract_timeout,
        )
        .instrument(info_span!("extract"))
        .await
        {
            Ok(text) => text,
            Err(err) => {
                return Outcome::PermanentFailure {
                    kind: FailureKind::Extraction,
                    message: err.to_string(),
                }
            }
        };

        debug!(
            bytes = bytes.len(),
            chars = raw_text.chars().count(),
            attempts = fetched.attempts,
            "Row processed"
        );

        Outcome::Success(SuccessRecord {
            raw_text,
            bytes: bytes.len() as u64,
            mime: fetched.mime,
            filename: fetched.filename,
            sha256,
            downloaded_at: row.downloaded_at.unwrap_or(fetched.completed_at),
        })
    }

    /// Applies the give-up policy and the message length limit.
    fn finalize(&self, row: &DocumentRow, outcome: Outcome) -> Outcome {
        let max_len = self.config.error_max_len;
        match outcome {
            Outcome::Success(_) => outcome,
            Outcome::TransientFailure { kind, message } => {
                let attempt = u32::try_from(row.process_attempts)
                    .unwrap_or(0)
                    .saturating_add(1);
                if attempt >= self.config.max_attempts {
                    warn!(row_id = %row.id, attempt, kind = %kind, "Giving up on row");
                    Outcome::PermanentFailure {
                        kind,
                        message: truncate_chars(
                            &format!("giving up after {} attempts: {}", attempt, message),
                            max_len,
                        ),
                    }
                } else {
                    warn!(row_id = %row.id, attempt, kind = %kind, "Transient failure");
                    Outcome::TransientFailure {
                        kind,
                        message: truncate_chars(&message, max_len),
                    }
                }
            }
            Outcome::PermanentFailure { kind, message } => {
                warn!(row_id = %row.id, kind = %kind, "Permanent failure");
                Outcome::PermanentFailure {
                    kind,
                    message: truncate_chars(&message, max_len),
                }
            }
        }
    }
}

fn fetch_failure(err: &FetchError) -> Outcome {
    let kind = match err {
        FetchError::InvalidUrl { .. } => FailureKind::InvalidUrl,
        FetchError::SizeExceeded { .. } => FailureKind::SizeExceeded,
        FetchError::UnacceptedMime { .. } => FailureKind::UnacceptedMime,
        FetchError::HttpStatus { .. } => FailureKind::HttpStatus,
        FetchError::NetworkTransient { .. } | FetchError::Client(_) => {
            FailureKind::NetworkTransient
        }
    };
    let message = err.to_string();

    if err.is_permanent() {
        Outcome::PermanentFailure { kind, message }
    } else {
        Outcome::TransientFailure { kind, message }
    }
}
