//! Configuration module - upload settings and retry parameters

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::ledger::DEFAULT_RETENTION_DAYS;
use crate::retry::{
    RetryPolicy, DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_MS, PART_MAX_ATTEMPTS,
};
use crate::utils::state_dir::{LEDGER_FILE_NAME, STATE_DIR_NAME};

/// Default part size (10 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Optional configuration parameters for Config::new()
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub chunk_size: Option<u64>,
    pub part_max_attempts: Option<u32>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub retention_days: Option<i64>,
    pub request_timeout_secs: Option<u64>,
    pub ledger_path: Option<PathBuf>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub token: String,
    pub chunk_size: u64,
    pub part_max_attempts: u32,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub retention_days: i64,
    pub request_timeout_secs: u64,
    pub ledger_path: PathBuf,
}

impl Config {
    /// Create a new Config with required base_url and token, plus optional settings
    pub fn new(base_url: String, token: String, options: ConfigOptions) -> Result<Arc<Self>> {
        let base_url = base_url.trim();
        let base_url = if base_url.is_empty() || base_url.contains("://") {
            base_url.to_string()
        } else {
            format!("https://{}", base_url)
        };

        // Remove trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        if base_url.is_empty() {
            return Err(anyhow!("base_url cannot be empty"));
        }

        if token.is_empty() {
            return Err(anyhow!("token cannot be empty"));
        }

        let chunk_size = options.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(anyhow!("chunk_size must be greater than zero"));
        }

        let backoff_factor = options.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR);
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(anyhow!("backoff_factor must be at least 1.0"));
        }

        let retention_days = options.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        retention_window(retention_days)?;

        let ledger_path = match options.ledger_path {
            Some(path) => path,
            None => std::env::current_dir()?
                .join(STATE_DIR_NAME)
                .join(LEDGER_FILE_NAME),
        };

        Ok(Arc::new(Self {
            base_url,
            token,
            chunk_size,
            part_max_attempts: options.part_max_attempts.unwrap_or(PART_MAX_ATTEMPTS).max(1),
            max_attempts: options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            initial_delay_ms: options.initial_delay_ms.unwrap_or(DEFAULT_INITIAL_DELAY_MS),
            max_delay_ms: options.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS),
            backoff_factor,
            retention_days,
            request_timeout_secs: options
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ledger_path,
        }))
    }

    /// Policy for create/abort calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            backoff_factor: self.backoff_factor,
        }
    }

    /// Policy for upload-part calls
    pub fn part_retry_policy(&self) -> RetryPolicy {
        self.retry_policy().with_max_attempts(self.part_max_attempts)
    }

    pub fn retention(&self) -> Result<chrono::Duration> {
        retention_window(self.retention_days)
    }
}

/// Validate a retention window given in days
pub fn retention_window(days: i64) -> Result<chrono::Duration> {
    if days <= 0 {
        return Err(anyhow!("retention_days must be positive, got {}", days));
    }
    chrono::Duration::try_days(days)
        .ok_or_else(|| anyhow!("retention_days {} is out of range", days))
}
