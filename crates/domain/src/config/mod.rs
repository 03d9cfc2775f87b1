mod methods;

pub use methods::DEFAULT_READ_ONLY_METHODS;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the IPC client engine can be tuned with.
///
/// All durations are stored as milliseconds so the struct reads naturally
/// from TOML; use the `Duration` accessors in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Filesystem path of the node's Unix domain socket.
    #[serde(default = "d_socket_path")]
    pub socket_path: PathBuf,

    /// Per-call deadline.
    #[serde(default = "d_30000")]
    pub request_timeout_ms: u64,

    // ── Reconnection ────────────────────────────────────────────────
    #[serde(default = "d_true")]
    pub auto_reconnect: bool,
    #[serde(default = "d_5")]
    pub max_retries: u32,
    #[serde(default = "d_1000")]
    pub retry_delay_ms: u64,
    #[serde(default = "d_30000")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "d_backoff")]
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter added to each backoff step.
    #[serde(default = "d_1000")]
    pub max_jitter_ms: u64,
    /// Read-idle timeout. `0` disables it.
    #[serde(default)]
    pub idle_timeout_ms: u64,

    // ── Response cache ──────────────────────────────────────────────
    #[serde(default = "d_true")]
    pub cache_enabled: bool,
    #[serde(default = "d_1000_usize")]
    pub cache_size: usize,
    #[serde(default = "d_5000")]
    pub cache_ttl_ms: u64,
    /// Background purge of expired entries. `0` disables the sweep;
    /// expiry is still enforced lazily on read.
    #[serde(default = "d_60000")]
    pub cache_sweep_interval_ms: u64,
    /// Methods whose results may be cached.
    #[serde(default = "methods::d_read_only_methods")]
    pub read_only_methods: Vec<String>,

    // ── Batching ────────────────────────────────────────────────────
    #[serde(default)]
    pub batch_requests: bool,
    #[serde(default = "d_10_usize")]
    pub batch_size: usize,
    #[serde(default = "d_10")]
    pub batch_timeout_ms: u64,
    #[serde(default = "d_5_usize")]
    pub max_concurrent_batches: usize,
    #[serde(default = "d_true")]
    pub deduplication_enabled: bool,

    // ── Framing ─────────────────────────────────────────────────────
    #[serde(default = "d_max_buffer")]
    pub max_buffer_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: d_socket_path(),
            request_timeout_ms: 30_000,
            auto_reconnect: true,
            max_retries: 5,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            max_jitter_ms: 1000,
            idle_timeout_ms: 0,
            cache_enabled: true,
            cache_size: 1000,
            cache_ttl_ms: 5000,
            cache_sweep_interval_ms: 60_000,
            read_only_methods: methods::d_read_only_methods(),
            batch_requests: false,
            batch_size: 10,
            batch_timeout_ms: 10,
            max_concurrent_batches: 5,
            deduplication_enabled: true,
            max_buffer_bytes: d_max_buffer(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    /// `None` when the idle timeout is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn cache_sweep_interval(&self) -> Option<Duration> {
        (self.cache_sweep_interval_ms > 0)
            .then(|| Duration::from_millis(self.cache_sweep_interval_ms))
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Whether results of `method` may be served from / stored in the cache.
    pub fn is_cacheable(&self, method: &str) -> bool {
        self.cache_enabled && self.read_only_methods.iter().any(|m| m == method)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_socket_path() -> PathBuf {
    PathBuf::from("/tmp/geth.ipc")
}
fn d_true() -> bool {
    true
}
fn d_5() -> u32 {
    5
}
fn d_5_usize() -> usize {
    5
}
fn d_10() -> u64 {
    10
}
fn d_10_usize() -> usize {
    10
}
fn d_1000() -> u64 {
    1000
}
fn d_1000_usize() -> usize {
    1000
}
fn d_5000() -> u64 {
    5000
}
fn d_30000() -> u64 {
    30_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_backoff() -> f64 {
    2.0
}
fn d_max_buffer() -> usize {
    10 * 1024 * 1024
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ClientConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.socket_path.as_os_str().is_empty() {
            errors.push(ConfigError::error("socket_path", "socket_path must not be empty"));
        }

        if self.request_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "request_timeout_ms",
                "request timeout must be greater than 0",
            ));
        }

        if self.backoff_multiplier < 1.0 {
            errors.push(ConfigError::error(
                "backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }

        if self.retry_delay_ms > self.max_retry_delay_ms {
            errors.push(ConfigError::error(
                "retry_delay_ms",
                "retry delay must not exceed max_retry_delay_ms",
            ));
        }

        if self.auto_reconnect && self.max_retries == 0 {
            errors.push(ConfigError::warning(
                "max_retries",
                "auto_reconnect is enabled but max_retries is 0, reconnection will never be attempted",
            ));
        }

        if self.cache_enabled && self.cache_size == 0 {
            errors.push(ConfigError::error(
                "cache_size",
                "cache size must be greater than 0 when the cache is enabled",
            ));
        }

        if self.batch_requests {
            if self.batch_size == 0 {
                errors.push(ConfigError::error(
                    "batch_size",
                    "batch size must be greater than 0 when batching is enabled",
                ));
            }
            if self.max_concurrent_batches == 0 {
                errors.push(ConfigError::error(
                    "max_concurrent_batches",
                    "max_concurrent_batches must be greater than 0 when batching is enabled",
                ));
            }
        }

        if self.max_buffer_bytes == 0 {
            errors.push(ConfigError::error(
                "max_buffer_bytes",
                "framing buffer bound must be greater than 0",
            ));
        }

        errors
    }

    /// Convenience: `true` when `validate` reports no `Error`-level issue.
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|e| e.severity != ConfigSeverity::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
