//! Global `tracing` subscriber for the binary.
//!
//! The filter comes from `RUST_LOG` when set, otherwise `info`. Records
//! emitted through the `log` crate are forwarded into the same subscriber.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as fmt_layer, EnvFilter};

use crate::error::HarvestError;

const DEFAULT_FILTER: &str = "info,sqlx=warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}' (expected text or json)", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the subscriber. Fails if one is already installed.
pub fn init_tracing(format: LogFormat) -> Result<(), HarvestError> {
    tracing_log::LogTracer::init().map_err(|e| HarvestError::Telemetry(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter());
    let result = match format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt_layer::layer().with_writer(std::io::stderr).with_target(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                fmt_layer::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true),
            ),
        ),
    };
    result.map_err(|e| HarvestError::Telemetry(e.to_string()))
}
