//! The request engine: correlation table, routing, and dispatch.
//!
//! All mutable engine state (correlation table, batch queues, dedup table,
//! response cache) sits behind one `parking_lot::Mutex` that is never held
//! across an `.await`. Three background tasks run per client:
//!
//! - the **dispatcher** consumes [`ConnectionEvent`]s, feeds the frame
//!   parser, and settles pending calls;
//! - the **writer** drains the outbound queue onto the connection, so
//!   immediate writes leave in call order and a dropped caller can never
//!   cut a frame in half;
//! - the optional **sweeper** purges expired cache entries.
//!
//! Every pending call is removed from the table exactly once, by whichever
//! of response, timeout, write failure, or disconnect gets the lock first.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use nl_domain::ClientConfig;
use nl_protocol::jsonrpc::normalize_params;
use nl_protocol::{encode_frame, FrameParser, JsonRpcRequest, Message};

use crate::batch::{
    BatchAssembler, BatchItem, DedupTable, FlushDecision, Priority, TakeBatch, BATCH_DEFER_DELAY,
};
use crate::builder::RpcClientBuilder;
use crate::cache::{CacheStats, ResponseCache};
use crate::connection::{Connection, ConnectionEvent, ConnectionOptions, ConnectionState};
use crate::error::ClientError;
use crate::hooks::{ConnectionEventKind, MetricsSink, RequestPool};

const EVENT_CHANNEL_CAPACITY: usize = 256;

type CallResult = Result<Value, ClientError>;

/// Per-call overrides for [`RpcClient::call_with`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Position inside a batch. Ignored when batching is off.
    pub priority: Priority,
    /// Replaces `request_timeout_ms` for this call.
    pub timeout: Option<Duration>,
    /// Bypass the response cache for lookup and population.
    pub skip_cache: bool,
}

impl CallOptions {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

/// Point-in-time counters from [`RpcClient::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub pending: usize,
    pub queued: usize,
    pub in_flight_batches: usize,
    pub cache: CacheStats,
    pub parse_errors: u64,
    pub buffer_overflows: u64,
    /// Inbound bytes held by the frame parser waiting for the rest of a
    /// message.
    pub buffered_bytes: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// `connect()` not called yet, or the last attempt failed.
    Idle,
    Open,
    /// `disconnect()` was called; calls fail until the next `connect()`.
    ShutDown,
}

struct PendingCall {
    method: String,
    key: String,
    timeout: Duration,
    /// The leader plus every deduplicated follower.
    waiters: Vec<oneshot::Sender<CallResult>>,
    timer: AbortHandle,
    /// Set once the call has left the queue inside a flushed batch.
    batch: Option<u64>,
    cacheable: bool,
    /// Connection generation the call belongs to: the stream current at
    /// registration, raised to the stream it was actually written on.
    generation: u64,
}

impl PendingCall {
    fn settle(self, result: CallResult) {
        for waiter in self.waiters {
            // A dropped receiver means the caller stopped waiting.
            let _ = waiter.send(result.clone());
        }
    }
}

struct EngineState {
    phase: Phase,
    /// Set when reconnection gave up, cleared by the next connect.
    exhausted: Option<u32>,
    pending: HashMap<String, PendingCall>,
    cache: ResponseCache,
    batches: BatchAssembler,
    dedup: DedupTable,
}

impl EngineState {
    /// Remove a call from the correlation table and every structure that
    /// references it. Returns whether a batch concurrency slot was freed.
    fn take_pending(&mut self, id: &str) -> Option<(PendingCall, bool)> {
        let call = self.pending.remove(id)?;
        call.timer.abort();
        self.dedup.release(&call.key, id);
        let freed = match call.batch {
            Some(batch_id) => self.batches.complete_one(batch_id),
            None => {
                self.batches.remove_queued(id);
                false
            }
        };
        Some((call, freed))
    }
}

/// A frame waiting for the writer task.
struct Outbound {
    bytes: Vec<u8>,
    ids: Vec<String>,
}

enum Routed {
    Cached(Value),
    Failed(ClientError),
    Waiting(oneshot::Receiver<CallResult>),
}

struct Channels {
    events: mpsc::Receiver<ConnectionEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

struct Inner {
    config: ClientConfig,
    connection: Arc<Connection>,
    state: Mutex<EngineState>,
    next_id: AtomicU64,
    metrics: Arc<dyn MetricsSink>,
    pool: Option<Arc<dyn RequestPool>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Taken by the first `connect()`, which starts the background tasks.
    channels: Mutex<Option<Channels>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    parse_errors: AtomicU64,
    overflows: AtomicU64,
    buffered: AtomicUsize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-RPC client for a node's IPC socket.
///
/// Cheap to clone; clones share one connection and one correlation table.
///
/// ```rust,no_run
/// # async fn run() -> Result<(), nl_client::ClientError> {
/// use nl_client::RpcClient;
/// use serde_json::json;
///
/// let client = RpcClient::builder()
///     .socket_path("/tmp/geth.ipc")
///     .build()?;
/// client.connect().await?;
/// let head = client.call("eth_blockNumber", json!([])).await?;
/// client.disconnect().await;
/// # let _ = head;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }

    /// Validate `config` and build a client with no hooks installed.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        RpcClientBuilder::from_config(config).build()
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        metrics: Arc<dyn MetricsSink>,
        pool: Option<Arc<dyn RequestPool>>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connection = Connection::new(ConnectionOptions::from_config(&config), event_tx);

        let state = EngineState {
            phase: Phase::Idle,
            exhausted: None,
            pending: HashMap::new(),
            cache: ResponseCache::new(config.cache_size, config.cache_ttl()),
            batches: BatchAssembler::new(
                config.batch_size,
                config.batch_timeout(),
                config.max_concurrent_batches,
            ),
            dedup: DedupTable::default(),
        };

        Self {
            inner: Arc::new(Inner {
                config,
                connection,
                state: Mutex::new(state),
                next_id: AtomicU64::new(1),
                metrics,
                pool,
                outbound: outbound_tx,
                channels: Mutex::new(Some(Channels {
                    events: event_rx,
                    outbound: outbound_rx,
                })),
                tasks: Mutex::new(Vec::new()),
                parse_errors: AtomicU64::new(0),
                overflows: AtomicU64::new(0),
                buffered: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open the connection and start accepting calls. Also recovers a
    /// client after `disconnect()` or exhausted reconnection.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.start_tasks();
        self.inner.state.lock().phase = Phase::Open;
        if let Err(e) = self.inner.connection.open().await {
            self.inner.state.lock().phase = Phase::Idle;
            return Err(e);
        }
        self.inner.state.lock().exhausted = None;
        Ok(())
    }

    /// Stop accepting calls, reject everything outstanding, clear the
    /// cache, and close the connection. Idempotent.
    pub async fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::ShutDown {
                return;
            }
            state.phase = Phase::ShutDown;
        }
        self.inner
            .fail_all(ClientError::Cleared, ClientError::ConnectionClosed);
        self.inner.state.lock().cache.clear();
        self.inner.connection.close().await;
        tracing::info!("client shut down");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// Issue one call with default options.
    pub async fn call(&self, method: &str, params: Value) -> CallResult {
        self.call_with(method, params, CallOptions::default()).await
    }

    /// Issue one call and deserialize its result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ClientError> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn call_with(&self, method: &str, params: Value, opts: CallOptions) -> CallResult {
        let started = Instant::now();
        self.inner.metrics.on_call_start(method);

        let result = match self.inner.route(method, params, &opts) {
            Routed::Cached(value) => {
                self.inner
                    .metrics
                    .on_call_success(method, started.elapsed(), true);
                return Ok(value);
            }
            Routed::Failed(e) => Err(e),
            Routed::Waiting(rx) => rx.await.unwrap_or(Err(ClientError::ConnectionClosed)),
        };

        match &result {
            Ok(_) => self
                .inner
                .metrics
                .on_call_success(method, started.elapsed(), false),
            Err(e) => self.inner.metrics.on_call_failure(method, e.kind()),
        }
        result
    }

    /// Issue several calls concurrently. Results come back in input order.
    pub async fn call_many<I, M>(&self, requests: I) -> Vec<CallResult>
    where
        I: IntoIterator<Item = (M, Value)>,
        M: Into<String>,
    {
        let calls = requests.into_iter().map(|(method, params)| {
            let client = self.clone();
            let method = method.into();
            async move { client.call(&method, params).await }
        });
        join_all(calls).await
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.inner.state.lock();
        EngineStats {
            pending: state.pending.len(),
            queued: state.batches.queued_len(),
            in_flight_batches: state.batches.in_flight_len(),
            cache: state.cache.stats(),
            parse_errors: self.inner.parse_errors.load(Ordering::Relaxed),
            buffer_overflows: self.inner.overflows.load(Ordering::Relaxed),
            buffered_bytes: self.inner.buffered.load(Ordering::Relaxed),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Inner {
    fn route(self: &Arc<Self>, method: &str, params: Value, opts: &CallOptions) -> Routed {
        let params = normalize_params(params);
        let key = ResponseCache::key(method, &params);
        let cacheable = !opts.skip_cache && self.config.is_cacheable(method);
        let dedup = self.config.deduplication_enabled;

        let mut state = self.state.lock();
        match state.phase {
            Phase::Idle => return Routed::Failed(ClientError::NotConnected),
            Phase::ShutDown => return Routed::Failed(ClientError::ConnectionClosed),
            Phase::Open => {}
        }
        if let Some(attempts) = state.exhausted {
            return Routed::Failed(ClientError::MaxRetriesExceeded(attempts));
        }

        if cacheable {
            if let Some(value) = state.cache.get(&key) {
                tracing::debug!(method, "cache hit");
                return Routed::Cached(value);
            }
        }

        let (tx, rx) = oneshot::channel();

        if dedup {
            if let Some(leader) = state.dedup.leader(&key).map(str::to_owned) {
                if let Some(call) = state.pending.get_mut(&leader) {
                    call.waiters.push(tx);
                    tracing::debug!(id = %leader, method, "attached to in-flight request");
                    return Routed::Waiting(rx);
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let timeout = opts.timeout.unwrap_or_else(|| self.config.request_timeout());
        let timer = self.spawn_timeout(id.clone(), Instant::now() + timeout);
        let request = self.envelope(&id, method, params);

        state.pending.insert(
            id.clone(),
            PendingCall {
                method: method.to_owned(),
                key: key.clone(),
                timeout,
                waiters: vec![tx],
                timer,
                batch: None,
                cacheable,
                generation: self.connection.generation(),
            },
        );
        if dedup {
            state.dedup.track(key, id.clone());
        }

        if self.config.batch_requests {
            tracing::debug!(id = %id, method, priority = ?opts.priority, "queued");
            let decision = state.batches.enqueue(BatchItem::new(request, opts.priority));
            drop(state);
            self.apply(decision);
            return Routed::Waiting(rx);
        }

        match encode_frame(&request) {
            Ok(bytes) => {
                tracing::debug!(id = %id, method, "sending request");
                // Enqueued under the lock so immediate writes keep call order.
                self.send(Outbound {
                    bytes,
                    ids: vec![id],
                });
                drop(state);
            }
            Err(e) => {
                let taken = state.take_pending(&id);
                drop(state);
                if let Some((call, _)) = taken {
                    call.settle(Err(e.into()));
                }
            }
        }
        self.recycle(request);
        Routed::Waiting(rx)
    }

    fn envelope(&self, id: &str, method: &str, params: Value) -> JsonRpcRequest {
        match &self.pool {
            Some(pool) => {
                let mut request = pool.acquire();
                request.refill(id, method, params);
                request
            }
            None => JsonRpcRequest::new(id, method, params),
        }
    }

    fn recycle(&self, request: JsonRpcRequest) {
        if let Some(pool) = &self.pool {
            pool.release(request);
        }
    }

    fn send(&self, outbound: Outbound) {
        if let Err(mpsc::error::SendError(lost)) = self.outbound.send(outbound) {
            // Only possible while the client is being dropped.
            tracing::debug!(ids = ?lost.ids, "writer gone, frame dropped");
        }
    }

    fn apply(self: &Arc<Self>, decision: FlushDecision) {
        match decision {
            FlushDecision::Now => self.flush(),
            FlushDecision::ArmTimer { generation, delay } => {
                let weak = Arc::downgrade(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(inner) = weak.upgrade() else { return };
                    let due = inner.state.lock().batches.timer_fired(generation);
                    if due {
                        inner.flush();
                    }
                });
            }
            FlushDecision::Wait => {}
        }
    }

    /// Move queued items onto the wire, one batch per write, until the
    /// queues are drained below the flush threshold or the in-flight cap
    /// is reached.
    fn flush(self: &Arc<Self>) {
        loop {
            let mut state = self.state.lock();
            if state.phase != Phase::Open {
                return;
            }
            let (batch_id, items) = match state.batches.take_batch() {
                TakeBatch::Empty => return,
                TakeBatch::Saturated => {
                    let schedule = state.batches.mark_deferred();
                    drop(state);
                    if schedule {
                        tracing::debug!("batch concurrency cap reached, deferring flush");
                        self.spawn_deferred_flush();
                    }
                    return;
                }
                TakeBatch::Batch { batch_id, items } => (batch_id, items),
            };

            let ids: Vec<String> = items.iter().map(|item| item.request.id.clone()).collect();
            for id in &ids {
                if let Some(call) = state.pending.get_mut(id) {
                    call.batch = Some(batch_id);
                }
            }

            let requests: Vec<&JsonRpcRequest> = items.iter().map(|item| &item.request).collect();
            let mut failed = Vec::new();
            match encode_frame(&requests) {
                Ok(bytes) => {
                    let waited = items
                        .iter()
                        .map(|item| item.enqueued_at.elapsed())
                        .max()
                        .unwrap_or_default();
                    tracing::debug!(
                        batch_id,
                        size = ids.len(),
                        waited_us = waited.as_micros() as u64,
                        "flushing batch"
                    );
                    self.send(Outbound { bytes, ids });
                }
                Err(e) => {
                    let err = ClientError::from(e);
                    for id in &ids {
                        if let Some((call, _)) = state.take_pending(id) {
                            failed.push((call, err.clone()));
                        }
                    }
                }
            }

            let next = state.batches.check_flush_conditions();
            drop(state);

            for (call, err) in failed {
                call.settle(Err(err));
            }
            for item in items {
                self.recycle(item.request);
            }

            match next {
                FlushDecision::Now => continue,
                other => return self.apply(other),
            }
        }
    }

    fn spawn_deferred_flush(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(BATCH_DEFER_DELAY).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.state.lock().batches.deferral_fired();
            inner.flush();
        });
    }

    fn spawn_timeout(self: &Arc<Self>, id: String, deadline: Instant) -> AbortHandle {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&id);
            }
        })
        .abort_handle()
    }

    fn expire(self: &Arc<Self>, id: &str) {
        let Some((call, freed)) = self.state.lock().take_pending(id) else {
            return;
        };
        tracing::warn!(
            id,
            method = %call.method,
            timeout_ms = call.timeout.as_millis() as u64,
            "request timed out"
        );
        let err = ClientError::RequestTimeout {
            id: id.to_owned(),
            method: call.method.clone(),
            timeout: call.timeout,
        };
        call.settle(Err(err));
        if freed {
            self.flush();
        }
    }

    /// Reject the calls carried by a frame that could not be written.
    fn fail_ids(self: &Arc<Self>, ids: &[String], err: ClientError) {
        let mut calls = Vec::with_capacity(ids.len());
        let mut freed = false;
        {
            let mut state = self.state.lock();
            for id in ids {
                if let Some((call, slot)) = state.take_pending(id) {
                    freed |= slot;
                    calls.push(call);
                }
            }
        }
        tracing::warn!(count = calls.len(), error = %err, "write failed, rejecting calls");
        for call in calls {
            call.settle(Err(err.clone()));
        }
        if freed {
            self.flush();
        }
    }

    /// Reject the calls that belong to a lost stream. Calls registered on,
    /// or written to, a newer stream stay pending.
    fn fail_generation(self: &Arc<Self>, generation: u64, err: ClientError) {
        let mut calls = Vec::new();
        let mut freed = false;
        {
            let mut state = self.state.lock();
            let lost: Vec<String> = state
                .pending
                .iter()
                .filter(|(_, call)| call.generation <= generation)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &lost {
                if let Some((call, slot)) = state.take_pending(id) {
                    freed |= slot;
                    calls.push(call);
                }
            }
        }
        if !calls.is_empty() {
            tracing::debug!(count = calls.len(), generation, "rejecting calls of lost stream");
        }
        for call in calls {
            call.settle(Err(err.clone()));
        }
        if freed {
            self.flush();
        }
    }

    /// Record the stream generation a frame was written on.
    fn mark_sent(&self, ids: &[String], generation: u64) {
        let mut state = self.state.lock();
        for id in ids {
            if let Some(call) = state.pending.get_mut(id) {
                call.generation = call.generation.max(generation);
            }
        }
    }

    /// Reject every pending call: `queued_err` for calls still waiting in a
    /// batch queue, `err` for everything else. Also drops the dedup table.
    fn fail_all(&self, queued_err: ClientError, err: ClientError) {
        let (calls, queued) = {
            let mut state = self.state.lock();
            let queued: HashSet<String> = state
                .batches
                .clear()
                .into_iter()
                .map(|item| item.request.id)
                .collect();
            state.batches.abandon_in_flight();
            state.dedup.clear();
            let calls: Vec<(String, PendingCall)> = state.pending.drain().collect();
            (calls, queued)
        };
        if !calls.is_empty() {
            tracing::debug!(count = calls.len(), "rejecting pending calls");
        }
        for (id, call) in calls {
            call.timer.abort();
            let reason = if queued.contains(&id) {
                queued_err.clone()
            } else {
                err.clone()
            };
            call.settle(Err(reason));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background tasks and inbound path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Inner {
    fn start_tasks(self: &Arc<Self>) {
        let Some(channels) = self.channels.lock().take() else {
            return;
        };
        let mut tasks = self.tasks.lock();

        let weak = Arc::downgrade(self);
        let max_buffer = self.config.max_buffer_bytes;
        tasks.push(tokio::spawn(dispatch_loop(weak, channels.events, max_buffer)));

        let weak = Arc::downgrade(self);
        tasks.push(tokio::spawn(write_loop(weak, channels.outbound)));

        if self.config.cache_enabled {
            if let Some(period) = self.config.cache_sweep_interval() {
                let weak = Arc::downgrade(self);
                tasks.push(tokio::spawn(sweep_loop(weak, period)));
            }
        }
    }

    fn on_event(self: &Arc<Self>, event: ConnectionEvent, parser: &mut FrameParser) {
        if let Some(kind) = ConnectionEventKind::of(&event) {
            self.metrics.on_connection_event(kind);
        }
        match event {
            ConnectionEvent::Data(bytes) => {
                let fed = parser.feed(&bytes);
                self.parse_errors
                    .store(parser.parse_errors(), Ordering::Relaxed);
                match fed {
                    Ok(values) => {
                        for value in values {
                            for message in Message::from_value_flat(value) {
                                self.dispatch(message);
                            }
                        }
                    }
                    Err(e) => {
                        self.overflows.store(parser.overflows(), Ordering::Relaxed);
                        tracing::warn!(error = %e, "inbound buffer overflow, buffered bytes dropped");
                        self.metrics
                            .on_connection_event(ConnectionEventKind::BufferOverflow);
                    }
                }
            }
            // Every stream starts and ends with an empty parse buffer.
            ConnectionEvent::Connected => {
                parser.reset();
                self.state.lock().exhausted = None;
            }
            ConnectionEvent::Closed => parser.reset(),
            ConnectionEvent::Disconnected { generation, .. } => {
                parser.reset();
                self.fail_generation(generation, ClientError::ConnectionClosed);
            }
            ConnectionEvent::MaxRetriesExceeded { attempts } => {
                self.state.lock().exhausted = Some(attempts);
                self.fail_all(ClientError::ConnectionClosed, ClientError::ConnectionClosed);
            }
            ConnectionEvent::Reconnecting { .. } | ConnectionEvent::Reconnected { .. } => {}
        }
        self.buffered.store(parser.buffered_len(), Ordering::Relaxed);
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        let Some(id) = message.id else {
            tracing::trace!(method = ?message.method, "ignoring notification");
            return;
        };

        let mut state = self.state.lock();
        let Some((call, freed)) = state.take_pending(&id) else {
            drop(state);
            tracing::debug!(id = %id, "no pending call for response, dropped");
            return;
        };

        let result = message.outcome.into_result().map_err(ClientError::from);
        if call.cacheable && state.phase == Phase::Open {
            if let Ok(value) = &result {
                state.cache.put(call.key.clone(), value.clone());
            }
        }
        drop(state);

        match &result {
            Ok(_) => tracing::debug!(id = %id, method = %call.method, "response"),
            Err(e) => tracing::debug!(id = %id, method = %call.method, error = %e, "error response"),
        }
        call.settle(result);
        if freed {
            self.flush();
        }
    }

    /// Whether any call carried by a frame is still waiting for it.
    fn any_pending(&self, ids: &[String]) -> bool {
        let state = self.state.lock();
        ids.iter().any(|id| state.pending.contains_key(id))
    }
}

async fn dispatch_loop(
    weak: Weak<Inner>,
    mut events: mpsc::Receiver<ConnectionEvent>,
    max_buffer_bytes: usize,
) {
    let mut parser = FrameParser::new(max_buffer_bytes);
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        inner.on_event(event, &mut parser);
    }
}

async fn write_loop(weak: Weak<Inner>, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(frame) = outbound.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        // Frames for calls that already settled (disconnect, timeout) stay
        // off the wire.
        if !inner.any_pending(&frame.ids) {
            continue;
        }
        match inner.connection.write(&frame.bytes).await {
            Ok(generation) => inner.mark_sent(&frame.ids, generation),
            Err(e) => inner.fail_ids(&frame.ids, e),
        }
    }
}

async fn sweep_loop(weak: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        let purged = inner.state.lock().cache.purge_expired();
        if purged > 0 {
            tracing::trace!(purged, "expired cache entries swept");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        self.connection.abort();
    }
}
