//! Initialisation options and fail-fast validation.
//!
//! Invalid options are the only failure the library ever surfaces to the
//! caller; everything downstream is logged and observable through
//! [`crate::DebugInfo`].

use thiserror::Error;

/// Why `initialize` refused the options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("write key must not be empty")]
    EmptyWriteKey,
    #[error("ingestion host `{0}` is not an absolute URL with a scheme")]
    InvalidHost(String),
    #[error("ingestion host `{0}` must not end with `/`")]
    TrailingSlashHost(String),
}

/// User-facing configuration surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub write_key: String,
    /// Scheme-qualified collector origin without a trailing slash,
    /// e.g. `https://ingest.example.com`.
    pub ingestion_host: String,
    /// Enables the verbose pipeline logs.
    pub debug: bool,
    /// Periodic flush cadence; clamped to ≥ 1 at use.
    pub flush_interval_seconds: u64,
    /// Queue capacity; clamped to ≥ 1 at use.
    pub max_queue_events: usize,
    pub advertising_id: Option<String>,
}

impl InitOptions {
    /// Build options from string input, trimming whitespace and stripping
    /// trailing slashes from the host. Validation still happens at
    /// `initialize`.
    pub fn new(write_key: impl Into<String>, ingestion_host: impl Into<String>) -> Self {
        let ingestion_host = ingestion_host.into().trim().trim_end_matches('/').to_string();
        Self {
            write_key: write_key.into().trim().to_string(),
            ingestion_host,
            debug: false,
            flush_interval_seconds: 10,
            max_queue_events: 2_000,
            advertising_id: None,
        }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn flush_interval_seconds(mut self, seconds: u64) -> Self {
        self.flush_interval_seconds = seconds;
        self
    }

    pub fn max_queue_events(mut self, capacity: usize) -> Self {
        self.max_queue_events = capacity;
        self
    }

    pub fn advertising_id(mut self, id: impl Into<String>) -> Self {
        self.advertising_id = Some(id.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.write_key.trim().is_empty() {
            return Err(ConfigError::EmptyWriteKey);
        }
        if self.ingestion_host.ends_with('/') {
            return Err(ConfigError::TrailingSlashHost(self.ingestion_host.clone()));
        }
        let parsed = reqwest::Url::parse(&self.ingestion_host)
            .map_err(|_| ConfigError::InvalidHost(self.ingestion_host.clone()))?;
        if !parsed.has_host() {
            return Err(ConfigError::InvalidHost(self.ingestion_host.clone()));
        }
        Ok(())
    }
}
