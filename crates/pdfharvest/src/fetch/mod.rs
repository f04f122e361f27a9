//! Bounded, retrying download of remote documents.
//!
//! The body is streamed chunk by chunk so an oversized or non-PDF response is
//! abandoned as soon as that is known, without buffering the rest.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::{is_retryable_status, FetchError};
use crate::sanitize::redact_url;

pub mod filename;
pub mod retry;
pub mod sniff;

pub use retry::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub max_bytes: u64,
    pub connect_timeout: Duration,
    /// Applies to the response head and to every body chunk.
    pub read_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub user_agent: String,
}

impl FetchLimits {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_bytes: config.max_bytes(),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            max_retries: config.retry_total,
            backoff: BackoffPolicy {
                base: Duration::from_secs_f64(config.retry_backoff_secs),
                max: Duration::from_secs_f64(config.retry_backoff_max_secs),
                jitter: true,
            },
            user_agent: config.user_agent.clone(),
        }
    }
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    /// Always `application/pdf` for accepted content.
    pub mime: String,
    pub declared_mime: Option<String>,
    pub filename: Option<String>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

enum AttemptError {
    Permanent(FetchError),
    Retryable(RetryReason),
}

enum RetryReason {
    Status(u16),
    Network(String),
}

impl RetryReason {
    fn into_error(self, attempts: u32) -> FetchError {
        match self {
            Self::Status(status) => FetchError::HttpStatus { status, attempts },
            Self::Network(reason) => FetchError::NetworkTransient { reason, attempts },
        }
    }
}

/// Downloads documents over one shared HTTP client.
pub struct ContentFetcher {
    client: Client,
    limits: FetchLimits,
}

impl ContentFetcher {
    pub fn new(limits: FetchLimits) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(limits.user_agent.as_str())
            .connect_timeout(limits.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, limits })
    }

    pub fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    /// Fetches `raw_url`, retrying transient failures with backoff.
    pub async fn fetch(&self, raw_url: &str) -> Result<FetchedContent, FetchError> {
        let url = validate_url(raw_url)?;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.fetch_once(&url).await {
                Ok(mut content) => {
                    content.attempts = attempt;
                    debug!(
                        bytes = content.bytes.len(),
                        attempts = attempt,
                        "Download complete"
                    );
                    return Ok(content);
                }
                Err(AttemptError::Permanent(mut err)) => {
                    if let FetchError::HttpStatus { attempts, .. } = &mut err {
                        *attempts = attempt;
                    }
                    return Err(err);
                }
                Err(AttemptError::Retryable(reason)) => {
                    let err = reason.into_error(attempt);
                    if attempt > self.limits.max_retries {
                        return Err(err);
                    }
                    let delay = self.limits.backoff.delay_for(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying download"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchedContent, AttemptError> {
        let read_timeout = self.limits.read_timeout;
        let max_bytes = self.limits.max_bytes;

        let mut response =
            match tokio::time::timeout(read_timeout, self.client.get(url.clone()).send()).await {
                Err(_) => {
                    return Err(AttemptError::Retryable(RetryReason::Network(format!(
                        "no response within {:?}",
                        read_timeout
                    ))))
                }
                Ok(Err(e)) if e.is_builder() => {
                    return Err(AttemptError::Permanent(FetchError::InvalidUrl {
                        url: redact_url(url.as_str()),
                        reason: describe_error(&e),
                    }))
                }
                Ok(Err(e)) => {
                    return Err(AttemptError::Retryable(RetryReason::Network(
                        describe_error(&e),
                    )))
                }
                Ok(Ok(response)) => response,
            };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(if is_retryable_status(status) {
                AttemptError::Retryable(RetryReason::Status(status))
            } else {
                AttemptError::Permanent(FetchError::HttpStatus {
                    status,
                    attempts: 1,
                })
            });
        }

        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                return Err(AttemptError::Permanent(FetchError::SizeExceeded {
                    limit: max_bytes,
                    observed: declared,
                }));
            }
        }

        let declared_mime = header_string(&response, CONTENT_TYPE);
        let filename = filename::guess_filename(
            response.url(),
            header_string(&response, CONTENT_DISPOSITION).as_deref(),
        );

        let capacity = response.content_length().unwrap_or(64 * 1024).min(max_bytes);
        let mut body: Vec<u8> = Vec::with_capacity(capacity as usize);
        let mut sniffed = false;

        loop {
            let next = match tokio::time::timeout(read_timeout, response.chunk()).await {
                Err(_) => {
                    return Err(AttemptError::Retryable(RetryReason::Network(format!(
                        "body stalled for {:?}",
                        read_timeout
                    ))))
                }
                Ok(Err(e)) => {
                    return Err(AttemptError::Retryable(RetryReason::Network(
                        describe_error(&e),
                    )))
                }
                Ok(Ok(next)) => next,
            };
            let Some(chunk) = next else { break };

            body.extend_from_slice(&chunk);
            if body.len() as u64 > max_bytes {
                return Err(AttemptError::Permanent(FetchError::SizeExceeded {
                    limit: max_bytes,
                    observed: body.len() as u64,
                }));
            }
            if !sniffed && body.len() >= sniff::SNIFF_WINDOW {
                sniff::resolve_mime(&body, declared_mime.as_deref())
                    .map_err(AttemptError::Permanent)?;
                sniffed = true;
            }
        }

        let mime = sniff::resolve_mime(&body, declared_mime.as_deref())
            .map_err(AttemptError::Permanent)?;

        Ok(FetchedContent {
            bytes: body,
            mime: mime.to_string(),
            declared_mime,
            filename,
            attempts: 1,
            completed_at: Utc::now(),
        })
    }
}

/// Checks that `raw` is an absolute http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<Url, FetchError> {
    let trimmed = raw.trim();
    let invalid = |reason: String| FetchError::InvalidUrl {
        url: redact_url(trimmed),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty url".to_string()));
    }
    let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Error text without the request URL, which may carry credentials.
fn describe_error(err: &reqwest::Error) -> String {
    let mut message = if err.is_timeout() {
        "timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else if err.is_body() || err.is_decode() {
        "body read failed".to_string()
    } else {
        "request failed".to_string()
    };
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
