//! Builder pattern for constructing an [`RpcClient`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nl_domain::{ClientConfig, ConfigSeverity};

use crate::engine::RpcClient;
use crate::error::ClientError;
use crate::hooks::{MetricsSink, NoopMetrics, RequestPool};
use crate::reconnect::ReconnectPolicy;

/// Fluent builder for [`RpcClient`].
///
/// Starts from [`ClientConfig::default`] (or a loaded config via
/// [`from_config`](Self::from_config)) and overrides individual options.
///
/// # Example
///
/// ```rust,no_run
/// # use nl_client::RpcClientBuilder;
/// let client = RpcClientBuilder::new()
///     .socket_path("/var/run/geth.ipc")
///     .request_timeout(std::time::Duration::from_secs(10))
///     .batching(true)
///     .batch_size(20)
///     .build()
///     .unwrap();
/// ```
pub struct RpcClientBuilder {
    config: ClientConfig,
    metrics: Arc<dyn MetricsSink>,
    pool: Option<Arc<dyn RequestPool>>,
}

impl RpcClientBuilder {
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Start from an existing configuration (e.g. the `[ipc]` section of
    /// an application config file).
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(NoopMetrics),
            pool: None,
        }
    }

    // ── Connection ───────────────────────────────────────────────────

    /// Set the node's IPC socket path.
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.socket_path = path.into();
        self
    }

    /// Per-call deadline (default 30s).
    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.config.request_timeout_ms = d.as_millis() as u64;
        self
    }

    /// Reconnect automatically after an unexpected drop (default on).
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Override the whole reconnect policy.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.max_retries = policy.max_retries;
        self.config.retry_delay_ms = policy.retry_delay.as_millis() as u64;
        self.config.max_retry_delay_ms = policy.max_retry_delay.as_millis() as u64;
        self.config.backoff_multiplier = policy.backoff_multiplier;
        self.config.max_jitter_ms = policy.max_jitter.as_millis() as u64;
        self
    }

    /// Treat the connection as dropped after this long without inbound
    /// bytes. Disabled by default.
    pub fn idle_timeout(mut self, d: Duration) -> Self {
        self.config.idle_timeout_ms = d.as_millis() as u64;
        self
    }

    // ── Cache ────────────────────────────────────────────────────────

    pub fn cache(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    /// Cache capacity in entries (default 1000).
    pub fn cache_size(mut self, n: usize) -> Self {
        self.config.cache_size = n;
        self
    }

    /// Cache entry time-to-live (default 5s).
    pub fn cache_ttl(mut self, d: Duration) -> Self {
        self.config.cache_ttl_ms = d.as_millis() as u64;
        self
    }

    /// Replace the cacheable method allow-list.
    pub fn read_only_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.read_only_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    // ── Batching ─────────────────────────────────────────────────────

    pub fn batching(mut self, enabled: bool) -> Self {
        self.config.batch_requests = enabled;
        self
    }

    /// Flush threshold and per-batch cap (default 10).
    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    /// Partial-batch flush timer (default 10ms).
    pub fn batch_timeout(mut self, d: Duration) -> Self {
        self.config.batch_timeout_ms = d.as_millis() as u64;
        self
    }

    /// Cap on flushed-but-unanswered batches (default 5).
    pub fn max_concurrent_batches(mut self, n: usize) -> Self {
        self.config.max_concurrent_batches = n;
        self
    }

    pub fn deduplication(mut self, enabled: bool) -> Self {
        self.config.deduplication_enabled = enabled;
        self
    }

    // ── Wire limits ──────────────────────────────────────────────────

    /// Inbound framing buffer bound (default 10 MiB).
    pub fn max_buffer_bytes(mut self, n: usize) -> Self {
        self.config.max_buffer_bytes = n;
        self
    }

    // ── Hooks ────────────────────────────────────────────────────────

    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn request_pool(mut self, pool: Arc<dyn RequestPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build the [`RpcClient`]. Error-level validation issues fail the
    /// build; warnings are logged.
    pub fn build(self) -> Result<RpcClient, ClientError> {
        let mut errors = Vec::new();
        for issue in self.config.validate() {
            match issue.severity {
                ConfigSeverity::Error => errors.push(issue.to_string()),
                ConfigSeverity::Warning => {
                    tracing::warn!(field = %issue.field, "{}", issue.message);
                }
            }
        }
        if !errors.is_empty() {
            return Err(ClientError::Config(errors.join("; ")));
        }

        Ok(RpcClient::from_parts(self.config, self.metrics, self.pool))
    }
}

impl Default for RpcClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
