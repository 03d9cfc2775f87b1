//! `nl-client`: JSON-RPC client engine for a node's IPC socket.
//!
//! This crate provides:
//! - A [`Connection`] that owns the Unix socket and reconnects with
//!   jittered exponential back-off.
//! - A TTL + LRU [`ResponseCache`] for read-only methods.
//! - A priority [`BatchAssembler`] with in-flight deduplication.
//! - The [`RpcClient`] engine that correlates responses to callers by id,
//!   enforces per-call timeouts, and routes each call to the cache, a
//!   batch, or an immediate write.
//!
//! # Usage
//!
//! ```rust,ignore
//! use nl_client::RpcClient;
//! use serde_json::json;
//!
//! let config: nl_domain::ClientConfig = /* from TOML */;
//! let client = RpcClient::new(config)?;
//! client.connect().await?;
//!
//! let head: String = client.call_as("eth_blockNumber", json!([])).await?;
//! let balances = client
//!     .call_many([
//!         ("eth_getBalance", json!(["0xabc", "latest"])),
//!         ("eth_getBalance", json!(["0xdef", "latest"])),
//!     ])
//!     .await;
//!
//! client.disconnect().await;
//! ```

pub mod batch;
pub mod builder;
pub mod cache;
pub mod connection;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod reconnect;

// Re-exports for convenience.
pub use batch::{BatchAssembler, DedupTable, Priority};
pub use builder::RpcClientBuilder;
pub use cache::{CacheStats, ResponseCache};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use engine::{CallOptions, EngineStats, RpcClient};
pub use error::{ClientError, ErrorKind};
pub use hooks::{ConnectionEventKind, MetricsSink, NoopMetrics, RequestPool};
pub use reconnect::ReconnectPolicy;
pub use nl_domain::ClientConfig;
