//! Error type surfaced to callers of the client engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nl_protocol::JsonRpcError;

/// Everything a call (or a lifecycle operation) can fail with.
///
/// `Clone` because one outcome is delivered to every caller that was
/// deduplicated onto the same in-flight request; I/O and JSON sources are
/// shared behind `Arc` for that reason.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ClientError {
    #[error("failed to connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("not connected")]
    NotConnected,

    #[error("reconnect exhausted after {0} attempts")]
    MaxRetriesExceeded(u32),

    #[error("request {id} ({method}) timed out after {}ms", timeout.as_millis())]
    RequestTimeout {
        id: String,
        method: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Protocol(#[from] JsonRpcError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request queue cleared")]
    Cleared,

    #[error("I/O: {0}")]
    Io(Arc<std::io::Error>),

    #[error("JSON: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("config: {0}")]
    Config(String),
}

/// Field-less discriminant of [`ClientError`], handed to metrics sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connect,
    NotConnected,
    MaxRetriesExceeded,
    RequestTimeout,
    Protocol,
    ConnectionClosed,
    Cleared,
    Io,
    Json,
    Config,
}

impl ClientError {
    pub(crate) fn connect(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Connect {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect { .. } => ErrorKind::Connect,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::MaxRetriesExceeded(_) => ErrorKind::MaxRetriesExceeded,
            Self::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::Cleared => ErrorKind::Cleared,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns `true` for failures caused by the connection rather than by
    /// the request itself; retrying after a reconnect may succeed.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::NotConnected
                | Self::MaxRetriesExceeded(_)
                | Self::ConnectionClosed
                | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(Arc::new(e))
    }
}
