use std::time::Duration;

use crate::config::Config;

/// The per-row knobs the processor needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub error_max_len: usize,
    pub extract_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.queue.max_attempts,
            error_max_len: config.queue.error_max_len,
            extract_timeout: Duration::from_secs(config.worker.extract_timeout_secs),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
