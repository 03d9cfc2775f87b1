//! The single stream connection to the node.
//!
//! [`Connection`] owns the Unix socket and nothing else: it connects,
//! writes frames, pumps inbound bytes to the engine as
//! [`ConnectionEvent::Data`], and runs the reconnection state machine when
//! the stream drops unexpectedly. It knows nothing about JSON-RPC.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nl_domain::ClientConfig;

use crate::error::ClientError;
use crate::reconnect::ReconnectPolicy;

const READ_BUF_BYTES: usize = 64 * 1024;

/// Lifecycle of the one connection an engine owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

/// Notifications from the connection to its owner, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    /// Raw inbound bytes, exactly as read.
    Data(Vec<u8>),
    /// The stream ended without `close()` being called. `generation`
    /// identifies the stream that was lost (see [`Connection::generation`]).
    Disconnected { reason: String, generation: u64 },
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected { attempts: u32 },
    /// Reconnection gave up; the connection stays down until `open()`.
    MaxRetriesExceeded { attempts: u32 },
    /// `close()` completed.
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub path: PathBuf,
    pub auto_reconnect: bool,
    pub policy: ReconnectPolicy,
    pub idle_timeout: Option<Duration>,
}

impl ConnectionOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            path: config.socket_path.clone(),
            auto_reconnect: config.auto_reconnect,
            policy: ReconnectPolicy::from_config(config),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Per-`open()` bookkeeping. State changes made by the background
/// supervisor go through this lock so they cannot land after `close()`.
struct Session {
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

/// Write half of the stream currently attached.
struct Attached {
    generation: u64,
    half: OwnedWriteHalf,
}

/// Owns the socket and its reconnection loop.
///
/// Writes are unbuffered: every frame is written and flushed on its own so
/// a small request is never held back waiting for more output.
pub struct Connection {
    opts: ConnectionOptions,
    state: watch::Sender<ConnectionState>,
    writer: tokio::sync::Mutex<Option<Attached>>,
    /// Bumped every time a new stream is attached.
    generation: AtomicU64,
    events: mpsc::Sender<ConnectionEvent>,
    /// Serializes concurrent `open()` calls.
    opening: tokio::sync::Mutex<()>,
    session: Mutex<Session>,
}

impl Connection {
    pub fn new(opts: ConnectionOptions, events: mpsc::Sender<ConnectionEvent>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            opts,
            state,
            writer: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            events,
            opening: tokio::sync::Mutex::new(()),
            session: Mutex::new(Session {
                cancel: CancellationToken::new(),
                supervisor: None,
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Generation of the most recently attached stream. `0` before the
    /// first successful connect.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Establish the stream. A no-op when already connected; an automatic
    /// reconnection in progress is superseded by this explicit attempt.
    pub async fn open(self: &Arc<Self>) -> Result<(), ClientError> {
        let _opening = self.opening.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let cancel = {
            let mut session = self.session.lock();
            session.cancel.cancel();
            if let Some(old) = session.supervisor.take() {
                old.abort();
            }
            session.cancel = CancellationToken::new();
            self.state.send_replace(ConnectionState::Connecting);
            session.cancel.clone()
        };

        tracing::info!(path = %self.opts.path.display(), "connecting to node");
        let stream = match UnixStream::connect(&self.opts.path).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(path = %self.opts.path.display(), error = %e, "connect failed");
                self.transition(&cancel, ConnectionState::Disconnected);
                return Err(ClientError::connect(&self.opts.path, e));
            }
        };

        let Some((read, generation)) = self.attach(stream, &cancel).await else {
            return Err(ClientError::ConnectionClosed);
        };

        let this = Arc::clone(self);
        let supervisor_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            this.supervise(read, generation, supervisor_cancel).await
        });

        let mut session = self.session.lock();
        if cancel.is_cancelled() {
            handle.abort();
        } else {
            session.supervisor = Some(handle);
        }
        Ok(())
    }

    /// Write one complete frame and return the generation of the stream
    /// it went out on. Fails with `NotConnected` unless the connection is
    /// in the `Connected` state.
    pub async fn write(&self, bytes: &[u8]) -> Result<u64, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        writer.half.write_all(bytes).await?;
        writer.half.flush().await?;
        tracing::trace!(bytes = bytes.len(), generation = writer.generation, "frame written");
        Ok(writer.generation)
    }

    /// Close the stream and stop any reconnection. Idempotent.
    pub async fn close(&self) {
        let supervisor = {
            let mut session = self.session.lock();
            let idle = session.supervisor.is_none()
                && self.state() == ConnectionState::Disconnected;
            if idle && session.cancel.is_cancelled() {
                return;
            }
            session.cancel.cancel();
            self.state.send_replace(ConnectionState::Disconnecting);
            session.supervisor.take()
        };

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.half.shutdown().await {
                tracing::debug!(error = %e, "error shutting down socket");
            }
        }
        if let Some(handle) = supervisor {
            handle.abort();
        }

        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!(path = %self.opts.path.display(), "connection closed");
        self.emit(ConnectionEvent::Closed).await;
    }

    /// Synchronous teardown for drop paths: cancels the session and aborts
    /// the supervisor without waiting for the socket to shut down.
    pub fn abort(&self) {
        let mut session = self.session.lock();
        session.cancel.cancel();
        if let Some(handle) = session.supervisor.take() {
            handle.abort();
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Apply a state change unless the session was cancelled by `close()`
    /// or a newer `open()`.
    fn transition(&self, cancel: &CancellationToken, next: ConnectionState) -> bool {
        let _session = self.session.lock();
        if cancel.is_cancelled() {
            return false;
        }
        self.state.send_replace(next);
        true
    }

    /// Install a freshly connected stream under a new generation. Returns
    /// `None` (dropping the stream) if the session was cancelled while
    /// connecting.
    async fn attach(
        &self,
        stream: UnixStream,
        cancel: &CancellationToken,
    ) -> Option<(OwnedReadHalf, u64)> {
        let (read, write) = stream.into_split();
        let generation = {
            let mut writer = self.writer.lock().await;
            if !self.transition(cancel, ConnectionState::Connected) {
                return None;
            }
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *writer = Some(Attached {
                generation,
                half: write,
            });
            generation
        };
        tracing::info!(path = %self.opts.path.display(), generation, "connected");
        self.emit(ConnectionEvent::Connected).await;
        Some((read, generation))
    }

    async fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("connection event receiver dropped");
        }
    }

    /// One task per `open()`: pump bytes until the stream drops, then
    /// reconnect (if enabled) and keep pumping on the new stream.
    async fn supervise(
        self: Arc<Self>,
        mut read: OwnedReadHalf,
        mut generation: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let reason = tokio::select! {
                reason = self.pump(&mut read) => reason,
                _ = cancel.cancelled() => return,
            };
            if cancel.is_cancelled() {
                return;
            }

            self.writer.lock().await.take();
            let next = if self.opts.auto_reconnect && self.opts.policy.max_retries > 0 {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
            if !self.transition(&cancel, next) {
                return;
            }
            tracing::warn!(path = %self.opts.path.display(), reason = %reason, "connection lost");
            self.emit(ConnectionEvent::Disconnected { reason, generation }).await;

            if next != ConnectionState::Reconnecting {
                return;
            }
            match self.reconnect(&cancel).await {
                Some((new_read, new_generation)) => {
                    read = new_read;
                    generation = new_generation;
                }
                None => return,
            }
        }
    }

    /// Forward inbound bytes until EOF, a read error, or the idle timeout.
    /// Returns the reason the stream ended.
    async fn pump(&self, read: &mut OwnedReadHalf) -> String {
        let mut buf = vec![0u8; READ_BUF_BYTES];
        loop {
            let result = match self.opts.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, read.read(&mut buf)).await {
                    Ok(r) => r,
                    Err(_) => return format!("idle for {}ms", idle.as_millis()),
                },
                None => read.read(&mut buf).await,
            };
            match result {
                Ok(0) => return "peer closed the stream".into(),
                Ok(n) => {
                    if self.events.send(ConnectionEvent::Data(buf[..n].to_vec())).await.is_err() {
                        return "event receiver dropped".into();
                    }
                }
                Err(e) => return format!("read error: {e}"),
            }
        }
    }

    /// Bounded retry loop. Returns the new read half and its generation on
    /// success, `None` when retries are exhausted or the session was
    /// cancelled.
    async fn reconnect(&self, cancel: &CancellationToken) -> Option<(OwnedReadHalf, u64)> {
        let policy = &self.opts.policy;
        for (attempt, delay) in policy.schedule() {
            tracing::info!(
                path = %self.opts.path.display(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            self.emit(ConnectionEvent::Reconnecting { attempt, delay }).await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return None,
            }

            match UnixStream::connect(&self.opts.path).await {
                Ok(stream) => {
                    let attached = self.attach(stream, cancel).await?;
                    tracing::info!(attempts = attempt, "reconnected");
                    self.emit(ConnectionEvent::Reconnected { attempts: attempt }).await;
                    return Some(attached);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        if !self.transition(cancel, ConnectionState::Disconnected) {
            return None;
        }
        tracing::error!(
            path = %self.opts.path.display(),
            attempts = policy.max_retries,
            "max reconnect attempts exhausted"
        );
        self.emit(ConnectionEvent::MaxRetriesExceeded {
            attempts: policy.max_retries,
        })
        .await;
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
