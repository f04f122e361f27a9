use std::path::Path;
use std::str::FromStr;

use crate::config::schema::Config;
use crate::db::QueueTable;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Largest accepted download cap; `bytes` is a 32-bit column.
const MAX_PDF_MB_LIMIT: f64 = 2047.0;
/// Upper bound for every timeout and backoff setting, in seconds.
const MAX_WAIT_SECS: f64 = 86_400.0;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Defaults, then the optional file, then environment overrides.
pub fn load_effective_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    validate_config(&config)?;
    Ok(config)
}

impl Config {
    /// Applies the process environment on top of this config.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`. Unset or blank variables are skipped.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = parse_env(&get, "WORKER_BATCH_SIZE")? {
            self.worker.batch_size = v;
        }
        if let Some(v) = parse_env(&get, "WORKER_CONCURRENCY")? {
            self.worker.concurrency = v;
        }
        if let Some(v) = parse_env(&get, "EXTRACT_TIMEOUT")? {
            self.worker.extract_timeout_secs = v;
        }
        if let Some(v) = parse_env(&get, "MAX_PDF_MB")? {
            self.fetch.max_pdf_mb = v;
        }
        if let Some(v) = parse_env(&get, "REQUEST_TIMEOUT")? {
            self.fetch.read_timeout_secs = v;
        }
        if let Some(v) = parse_env(&get, "CONNECT_TIMEOUT")? {
            self.fetch.connect_timeout_secs = v;
        }
        if let Some(v) = parse_env(&get, "REQUEST_RETRY_TOTAL")? {
            self.fetch.retry_total = v;
        }
        if let Some(v) = parse_env(&get, "REQUEST_RETRY_BACKOFF")? {
            self.fetch.retry_backoff_secs = v;
        }
        if let Some(v) = get("HTTP_USER_AGENT") {
            self.fetch.user_agent = v.trim().to_string();
        }
        if let Some(v) = get("DOCS_TABLE") {
            self.queue.table = v.trim().to_string();
        }
        if let Some(v) = parse_env(&get, "MAX_ATTEMPTS")? {
            self.queue.max_attempts = v;
        }
        if let Some(v) = parse_env(&get, "ERROR_MAX_LEN")? {
            self.queue.error_max_len = v;
        }
        if let Some(v) = parse_env(&get, "LEASE_SECS")? {
            self.queue.lease_secs = v;
        }

        Ok(())
    }
}

fn parse_env<T, G>(get: &G, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.worker.batch_size == 0 {
        return invalid("worker.batch_size must be at least 1".into());
    }
    if config.worker.concurrency == 0 {
        return invalid("worker.concurrency must be at least 1".into());
    }
    if config.worker.extract_timeout_secs == 0 {
        return invalid("worker.extract_timeout_secs must be at least 1".into());
    }

    let fetch = &config.fetch;
    if !(fetch.max_pdf_mb.is_finite() && fetch.max_pdf_mb > 0.0) || fetch.max_pdf_mb > MAX_PDF_MB_LIMIT
    {
        return invalid(format!(
            "fetch.max_pdf_mb must be in (0, {}], got {}",
            MAX_PDF_MB_LIMIT, fetch.max_pdf_mb
        ));
    }
    for (name, value) in [
        ("fetch.connect_timeout_secs", fetch.connect_timeout_secs),
        ("fetch.read_timeout_secs", fetch.read_timeout_secs),
    ] {
        if !(value.is_finite() && value > 0.0 && value <= MAX_WAIT_SECS) {
            return invalid(format!(
                "{} must be in (0, {}], got {}",
                name, MAX_WAIT_SECS, value
            ));
        }
    }
    for (name, value) in [
        ("fetch.retry_backoff_secs", fetch.retry_backoff_secs),
        ("fetch.retry_backoff_max_secs", fetch.retry_backoff_max_secs),
    ] {
        if !(value.is_finite() && value >= 0.0 && value <= MAX_WAIT_SECS) {
            return invalid(format!(
                "{} must be in [0, {}], got {}",
                name, MAX_WAIT_SECS, value
            ));
        }
    }
    if fetch.user_agent.trim().is_empty() {
        return invalid("fetch.user_agent must not be empty".into());
    }

    let queue = &config.queue;
    QueueTable::parse(&queue.table).map_err(|e| ConfigError::Validation {
        message: format!("queue.table: {}", e),
    })?;
    if queue.max_attempts == 0 || queue.max_attempts > i32::MAX as u32 {
        return invalid(format!(
            "queue.max_attempts must be between 1 and {}",
            i32::MAX
        ));
    }
    if queue.lease_secs == 0 {
        return invalid("queue.lease_secs must be at least 1".into());
    }
    if queue.error_max_len < 16 {
        return invalid("queue.error_max_len must be at least 16".into());
    }

    if let Some(max) = config.database.max_connections {
        let needed = config.worker.concurrency as u64 + 1;
        if (max as u64) < needed {
            return invalid(format!(
                "database.max_connections ({}) must be at least worker.concurrency + 1 ({})",
                max, needed
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "database": { "url_env_var": "PDFHARVEST_DB", "max_connections": 12 },
            "queue": { "table": "public.documents", "max_attempts": 3 },
            "fetch": { "max_pdf_mb": 10, "retry_total": 2 },
            "worker": { "batch_size": 50, "concurrency": 4 }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.database.url_env_var, "PDFHARVEST_DB");
        assert_eq!(config.queue.table, "public.documents");
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.fetch.max_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.worker.batch_size, 50);
        assert_eq!(config.worker.concurrency, 4);
        // untouched fields keep their defaults
        assert_eq!(config.queue.error_max_len, 800);
    }

    #[test]
    fn test_schema_rejects_unknown_section() {
        let err = load_config_from_str(r#"{ "workers": {} }"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_schema_rejects_wrong_type() {
        let err = load_config_from_str(r#"{ "worker": { "batch_size": "many" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_invalid_table_name() {
        let err = load_config_from_str(r#"{ "queue": { "table": "docs; DROP TABLE x" } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));

        // env overrides bypass the schema, so the semantic check must catch it too
        let mut config = Config::default();
        config.queue.table = "a.b.c".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_pool_smaller_than_workers_rejected() {
        let err = load_config_from_str(
            r#"{ "database": { "max_connections": 4 }, "worker": { "concurrency": 4 } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_connections"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "worker": {{ "batch_size": 7 }} }}"#).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.worker.batch_size, 7);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/pdfharvest.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("WORKER_BATCH_SIZE", "25"),
                ("WORKER_CONCURRENCY", "3"),
                ("MAX_PDF_MB", "12.5"),
                ("REQUEST_TIMEOUT", "45"),
                ("CONNECT_TIMEOUT", "5"),
                ("REQUEST_RETRY_TOTAL", "6"),
                ("REQUEST_RETRY_BACKOFF", "1.5"),
                ("HTTP_USER_AGENT", "acme-bot/2.0"),
                ("DOCS_TABLE", "prod.documents"),
                ("MAX_ATTEMPTS", "9"),
                ("ERROR_MAX_LEN", "400"),
                ("LEASE_SECS", "60"),
            ]))
            .unwrap();

        assert_eq!(config.worker.batch_size, 25);
        assert_eq!(config.worker.concurrency, 3);
        assert_eq!(config.fetch.max_pdf_mb, 12.5);
        assert_eq!(config.fetch.read_timeout_secs, 45.0);
        assert_eq!(config.fetch.connect_timeout_secs, 5.0);
        assert_eq!(config.fetch.retry_total, 6);
        assert_eq!(config.fetch.retry_backoff_secs, 1.5);
        assert_eq!(config.fetch.user_agent, "acme-bot/2.0");
        assert_eq!(config.queue.table, "prod.documents");
        assert_eq!(config.queue.max_attempts, 9);
        assert_eq!(config.queue.error_max_len, 400);
        assert_eq!(config.queue.lease_secs, 60);
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[("WORKER_BATCH_SIZE", "  "), ("DOCS_TABLE", "")]))
            .unwrap();
        assert_eq!(config.worker.batch_size, 200);
        assert_eq!(config.queue.table, "dev.documents_test");
    }

    #[test]
    fn test_unparseable_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(env(&[("WORKER_CONCURRENCY", "eight")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref name, .. } if name == "WORKER_CONCURRENCY"));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.worker.batch_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_negative_timeout() {
        let mut config = Config::default();
        config.fetch.read_timeout_secs = -1.0;
        assert!(validate_config(&config).is_err());
        config.fetch.read_timeout_secs = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_huge_waits() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[("REQUEST_RETRY_BACKOFF", "1e20")]))
            .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref message } if message.contains("fetch.retry_backoff_secs")),
            "{:?}",
            err
        );

        let mut config = Config::default();
        config.fetch.read_timeout_secs = 1e300;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.fetch.connect_timeout_secs = MAX_WAIT_SECS;
        config.fetch.retry_backoff_max_secs = MAX_WAIT_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_cap() {
        let mut config = Config::default();
        config.fetch.max_pdf_mb = 4096.0;
        assert!(validate_config(&config).is_err());
    }
}
