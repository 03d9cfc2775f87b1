//! Integration test: boots an in-process mock node on a Unix socket inside
//! a temp directory, connects a real [`RpcClient`], and drives it through
//! the request/response cycle.
//!
//! Covered:
//! - request framing on the wire and response correlation
//! - cache hits produce no wire traffic
//! - identical in-flight calls are sent once
//! - timeouts, late responses, protocol errors
//! - batching: one array per flush, priority order, out-of-order replies
//! - shutdown and node-side disconnects reject pending calls
//! - batch concurrency cap, batch write failures, inbound buffer overflow
//! - reconnection, and giving up after `max_retries`
//! - no stale partial frame survives a reconnect

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nl_client::{
    CallOptions, ClientError, ConnectionEventKind, ConnectionState, ErrorKind, MetricsSink,
    Priority, ReconnectPolicy, RequestPool, RpcClient, RpcClientBuilder,
};
use nl_protocol::JsonRpcRequest;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

// ── Mock node ──────────────────────────────────────────────────────────

/// Maps one request object to its reply, or `None` to stay silent.
type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

enum Command {
    /// Write raw bytes to the current connection.
    Raw(Vec<u8>),
    /// Drop the current connection; keep listening.
    Kick,
    /// Drop the connection and the listener, and remove the socket file.
    Shutdown,
}

struct MockNode {
    _dir: TempDir,
    path: PathBuf,
    lines: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedSender<Command>,
    bytes_read: Arc<AtomicUsize>,
}

impl MockNode {
    async fn start(responder: Responder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.ipc");
        let listener = UnixListener::bind(&path).unwrap();
        let (line_tx, lines) = mpsc::unbounded_channel();
        let (commands, cmd_rx) = mpsc::unbounded_channel();
        let bytes_read = Arc::new(AtomicUsize::new(0));

        tokio::spawn(serve(
            listener,
            path.clone(),
            responder,
            line_tx,
            cmd_rx,
            Arc::clone(&bytes_read),
        ));

        Self {
            _dir: dir,
            path,
            lines,
            commands,
            bytes_read,
        }
    }

    async fn next_line(&mut self) -> String {
        tokio::time::timeout(WAIT, self.lines.recv())
            .await
            .expect("timeout waiting for a request line")
            .expect("mock node stopped")
    }

    fn assert_quiet(&mut self) {
        assert!(self.lines.try_recv().is_err(), "unexpected request on the wire");
    }

    fn push(&self, raw: &str) {
        self.commands.send(Command::Raw(raw.as_bytes().to_vec())).unwrap();
    }

    fn kick(&self) {
        self.commands.send(Command::Kick).unwrap();
    }

    fn shutdown(&self) {
        self.commands.send(Command::Shutdown).unwrap();
    }

    fn bytes_read(&self) -> usize {
        self.bytes_read.load(Ordering::SeqCst)
    }
}

fn reply(responder: &Responder, request: &Value) -> Option<Value> {
    match request {
        // Batch replies come back reversed; correlation is by id only.
        Value::Array(items) => {
            let mut replies: Vec<Value> = items.iter().filter_map(|r| responder(r)).collect();
            replies.reverse();
            (!replies.is_empty()).then(|| Value::Array(replies))
        }
        single => responder(single),
    }
}

async fn serve(
    listener: UnixListener,
    path: PathBuf,
    responder: Responder,
    lines: mpsc::UnboundedSender<String>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    bytes_read: Arc<AtomicUsize>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            cmd = commands.recv() => match cmd {
                Some(Command::Shutdown) | None => break,
                Some(_) => continue,
            },
        };
        let Ok((stream, _)) = accepted else { break };
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read).lines();

        loop {
            tokio::select! {
                line = reader.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    bytes_read.fetch_add(line.len() + 1, Ordering::SeqCst);
                    let request: Value = serde_json::from_str(&line).unwrap();
                    let _ = lines.send(line);
                    if let Some(answer) = reply(&responder, &request) {
                        if write.write_all(format!("{answer}\n").as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(Command::Raw(bytes)) => {
                        if write.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Command::Kick) => break,
                    Some(Command::Shutdown) | None => {
                        drop(listener);
                        let _ = std::fs::remove_file(&path);
                        return;
                    }
                },
            }
        }
    }
    drop(listener);
    let _ = std::fs::remove_file(&path);
}

/// Answers every request with `result` = the method name, except the
/// methods in `silent`, which never get an answer.
fn echo_method(silent: &'static [&'static str]) -> Responder {
    Arc::new(move |req: &Value| {
        let method = req["method"].as_str()?;
        if silent.contains(&method) {
            return None;
        }
        Some(json!({"jsonrpc": "2.0", "id": req["id"], "result": method}))
    })
}

fn fast_policy(max_retries: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_retries,
        retry_delay: Duration::from_millis(20),
        max_retry_delay: Duration::from_millis(200),
        backoff_multiplier: 2.0,
        max_jitter: Duration::ZERO,
    }
}

fn builder(path: &Path) -> RpcClientBuilder {
    RpcClient::builder()
        .socket_path(path)
        .request_timeout(WAIT)
        .reconnect_policy(fast_policy(3))
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut).await.expect("timed out")
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    within(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

// ── Recording hooks ────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    starts: AtomicUsize,
    successes: AtomicUsize,
    cached: AtomicUsize,
    failures: Mutex<Vec<ErrorKind>>,
    events: Mutex<Vec<ConnectionEventKind>>,
}

impl Recorder {
    fn events(&self) -> Vec<ConnectionEventKind> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, kind: ConnectionEventKind) -> usize {
        self.events().iter().filter(|k| **k == kind).count()
    }
}

impl MetricsSink for Recorder {
    fn on_call_start(&self, _method: &str) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_call_success(&self, _method: &str, _elapsed: Duration, cached: bool) {
        self.successes.fetch_add(1, Ordering::SeqCst);
        if cached {
            self.cached.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_call_failure(&self, _method: &str, kind: ErrorKind) {
        self.failures.lock().unwrap().push(kind);
    }

    fn on_connection_event(&self, kind: ConnectionEventKind) {
        self.events.lock().unwrap().push(kind);
    }
}

#[derive(Default)]
struct CountingPool {
    free: Mutex<Vec<JsonRpcRequest>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl RequestPool for CountingPool {
    fn acquire(&self) -> JsonRpcRequest {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(JsonRpcRequest::empty)
    }

    fn release(&self, request: JsonRpcRequest) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.free.lock().unwrap().push(request);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn block_number_round_trip_then_cache_hit() {
    let mut node = MockNode::start(Arc::new(|req: &Value| {
        Some(json!({"id": req["id"], "jsonrpc": "2.0", "result": "0x10"}))
    }))
    .await;
    let metrics = Arc::new(Recorder::default());
    let client = builder(&node.path).metrics(metrics.clone()).build().unwrap();
    client.connect().await.unwrap();
    assert!(client.is_connected());

    let head = within(client.call("eth_blockNumber", json!([]))).await.unwrap();
    assert_eq!(head, json!("0x10"));
    assert_eq!(
        node.next_line().await,
        r#"{"jsonrpc":"2.0","id":"1","method":"eth_blockNumber","params":[]}"#
    );

    let read_before = node.bytes_read();
    let again = within(client.call("eth_blockNumber", json!([]))).await.unwrap();
    assert_eq!(again, json!("0x10"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.bytes_read(), read_before, "cache hit must not touch the wire");
    node.assert_quiet();

    let stats = client.stats();
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(metrics.starts.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.cached.load(Ordering::SeqCst), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn null_params_go_out_as_empty_list() {
    let mut node = MockNode::start(echo_method(&[])).await;
    let client = builder(&node.path).build().unwrap();
    client.connect().await.unwrap();

    within(client.call("net_version", Value::Null)).await.unwrap();
    let line: Value = serde_json::from_str(&node.next_line().await).unwrap();
    assert_eq!(line["params"], json!([]));
    client.disconnect().await;
}

#[tokio::test]
async fn identical_calls_share_one_transmission() {
    let mut node = MockNode::start(echo_method(&[])).await;
    let client = builder(&node.path).cache(false).build().unwrap();
    client.connect().await.unwrap();

    let params = json!(["0xabc", "latest"]);
    let (a, b) = within(async {
        tokio::join!(
            client.call("eth_getBalance", params.clone()),
            client.call("eth_getBalance", params.clone()),
        )
    })
    .await;
    assert_eq!(a.unwrap(), json!("eth_getBalance"));
    assert_eq!(b.unwrap(), json!("eth_getBalance"));

    node.next_line().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    node.assert_quiet();

    // Different params are a different request.
    within(client.call("eth_getBalance", json!(["0xabc", "0x1"]))).await.unwrap();
    assert!(node.next_line().await.contains("0x1"));
    client.disconnect().await;
}

#[tokio::test]
async fn timeout_then_late_response_is_dropped() {
    let mut node = MockNode::start(echo_method(&["eth_call"])).await;
    let client = builder(&node.path).build().unwrap();
    client.connect().await.unwrap();

    let opts = CallOptions::default().timeout(Duration::from_millis(100));
    let err = within(client.call_with("eth_call", json!([{"to": "0x1"}, "latest"]), opts))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ClientError::RequestTimeout { ref id, .. } if id == "1"),
        "got {err:?}"
    );
    node.next_line().await;

    node.push("{\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":\"0xlate\"}\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.stats().pending, 0);
    assert_eq!(client.stats().cache.len, 0, "late result must not be cached");

    // The engine keeps working.
    let chain = within(client.call("eth_chainId", json!([]))).await.unwrap();
    assert_eq!(chain, json!("eth_chainId"));
    client.disconnect().await;
}

#[tokio::test]
async fn node_error_surfaces_as_protocol_error() {
    let node = MockNode::start(Arc::new(|req: &Value| {
        Some(json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "error": {"code": -32601, "message": "the method eth_foo does not exist"}
        }))
    }))
    .await;
    let metrics = Arc::new(Recorder::default());
    let client = builder(&node.path).metrics(metrics.clone()).build().unwrap();
    client.connect().await.unwrap();

    let err = within(client.call("eth_foo", json!([]))).await.unwrap_err();
    match err {
        ClientError::Protocol(e) => assert_eq!(e.code, -32601),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert_eq!(*metrics.failures.lock().unwrap(), vec![ErrorKind::Protocol]);
    client.disconnect().await;
}

#[tokio::test]
async fn concatenated_responses_without_newlines() {
    let mut node = MockNode::start(echo_method(&["eth_getCode", "eth_getStorageAt"])).await;
    let client = builder(&node.path).build().unwrap();
    client.connect().await.unwrap();

    let code = client.call("eth_getCode", json!(["0x1", "latest"]));
    let slot = client.call("eth_getStorageAt", json!(["0x1", "0x0", "latest"]));
    let push = async {
        node.next_line().await;
        node.next_line().await;
        node.push(concat!(
            r#"{"jsonrpc":"2.0","id":"2","result":"0x0}"}"#,
            r#"{"jsonrpc":"2.0","id":"1","result":"0x60"}"#
        ));
    };
    let (code, slot, ()) = within(async { tokio::join!(code, slot, push) }).await;
    assert_eq!(code.unwrap(), json!("0x60"));
    assert_eq!(slot.unwrap(), json!("0x0}"));
    client.disconnect().await;
}

#[tokio::test]
async fn batch_goes_out_as_one_array_in_priority_order() {
    let mut node = MockNode::start(echo_method(&[])).await;
    let client = builder(&node.path)
        .cache(false)
        .batching(true)
        .batch_size(3)
        .batch_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let (low, normal, high) = within(async {
        tokio::join!(
            client.call_with("eth_getLogs", json!([{}]), CallOptions::default().priority(Priority::Low)),
            client.call("eth_syncing", json!([])),
            client.call_with("eth_gasPrice", json!([]), CallOptions::default().priority(Priority::High)),
        )
    })
    .await;
    assert_eq!(low.unwrap(), json!("eth_getLogs"));
    assert_eq!(normal.unwrap(), json!("eth_syncing"));
    assert_eq!(high.unwrap(), json!("eth_gasPrice"));

    let batch: Value = serde_json::from_str(&node.next_line().await).unwrap();
    let methods: Vec<&str> = batch
        .as_array()
        .expect("batched write is an array")
        .iter()
        .map(|r| r["method"].as_str().unwrap())
        .collect();
    assert_eq!(methods, vec!["eth_gasPrice", "eth_syncing", "eth_getLogs"]);
    node.assert_quiet();
    assert_eq!(client.stats().in_flight_batches, 0);
    client.disconnect().await;
}

#[tokio::test]
async fn partial_batch_flushes_on_timer() {
    let mut node = MockNode::start(echo_method(&[])).await;
    let client = builder(&node.path)
        .batching(true)
        .batch_size(10)
        .batch_timeout(Duration::from_millis(20))
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let peers = within(client.call("net_peerCount", json!([]))).await.unwrap();
    assert_eq!(peers, json!("net_peerCount"));
    let batch: Value = serde_json::from_str(&node.next_line().await).unwrap();
    assert_eq!(batch.as_array().map(Vec::len), Some(1));
    client.disconnect().await;
}

#[tokio::test]
async fn call_many_and_typed_results() {
    let node = MockNode::start(echo_method(&[])).await;
    let client = builder(&node.path).build().unwrap();
    client.connect().await.unwrap();

    let results = within(client.call_many([
        ("web3_clientVersion", json!([])),
        ("net_listening", json!([])),
        ("eth_chainId", json!([])),
    ]))
    .await;
    let values: Vec<Value> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        values,
        vec![json!("web3_clientVersion"), json!("net_listening"), json!("eth_chainId")]
    );

    let typed: String = within(client.call_as("eth_syncing", json!([]))).await.unwrap();
    assert_eq!(typed, "eth_syncing");
    let mismatch = within(client.call_as::<u64>("eth_gasPrice", json!([]))).await;
    assert!(matches!(mismatch, Err(ClientError::Json(_))));
    client.disconnect().await;
}

#[tokio::test]
async fn request_envelopes_come_from_the_pool() {
    let node = MockNode::start(echo_method(&[])).await;
    let pool = Arc::new(CountingPool::default());
    let client = builder(&node.path).request_pool(pool.clone()).build().unwrap();
    client.connect().await.unwrap();

    for i in 0..3 {
        within(client.call("eth_getTransactionCount", json!(["0xabc", i]))).await.unwrap();
    }
    assert_eq!(pool.acquired.load(Ordering::SeqCst), 3);
    assert_eq!(pool.released.load(Ordering::SeqCst), 3);
    client.disconnect().await;
}

#[tokio::test]
async fn identical_calls_share_one_batch_slot() {
    let mut node = MockNode::start(echo_method(&[])).await;
    let client = builder(&node.path)
        .cache(false)
        .batching(true)
        .batch_size(10)
        .batch_timeout(Duration::from_millis(20))
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let params = json!(["0xabc", "latest"]);
    let (a, b) = within(async {
        tokio::join!(
            client.call("eth_getBalance", params.clone()),
            client.call("eth_getBalance", params.clone()),
        )
    })
    .await;
    assert_eq!(a.unwrap(), json!("eth_getBalance"));
    assert_eq!(b.unwrap(), json!("eth_getBalance"));

    let batch: Value = serde_json::from_str(&node.next_line().await).unwrap();
    assert_eq!(batch.as_array().map(Vec::len), Some(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    node.assert_quiet();
    client.disconnect().await;
}

#[tokio::test]
async fn second_batch_waits_for_a_free_slot() {
    let mut node = MockNode::start(echo_method(&["eth_getCode", "eth_getStorageAt"])).await;
    let client = builder(&node.path)
        .cache(false)
        .batching(true)
        .batch_size(1)
        .max_concurrent_batches(1)
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let code = client.call("eth_getCode", json!(["0x1", "latest"]));
    let slot = client.call("eth_getStorageAt", json!(["0x1", "0x0", "latest"]));
    let drive = async {
        let first = node.next_line().await;
        assert!(first.contains("eth_getCode"), "got {first}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        node.assert_quiet();
        let stats = client.stats();
        assert_eq!((stats.queued, stats.in_flight_batches), (1, 1));

        node.push("[{\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":\"0x60\"}]\n");
        let second = node.next_line().await;
        assert!(second.contains("eth_getStorageAt"), "got {second}");
        node.push("[{\"jsonrpc\":\"2.0\",\"id\":\"2\",\"result\":\"0x0\"}]\n");
    };
    let (code, slot, ()) = within(async { tokio::join!(code, slot, drive) }).await;
    assert_eq!(code.unwrap(), json!("0x60"));
    assert_eq!(slot.unwrap(), json!("0x0"));
    assert_eq!(client.stats().in_flight_batches, 0);
    client.disconnect().await;
}

#[tokio::test]
async fn failed_batch_write_rejects_and_releases_calls() {
    let node = MockNode::start(echo_method(&[])).await;
    let client = builder(&node.path)
        .auto_reconnect(false)
        .cache(false)
        .batching(true)
        .batch_size(10)
        .batch_timeout(Duration::from_millis(5))
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let mut state = client.subscribe_state();
    node.shutdown();
    within(state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap();

    let params = json!(["0xabc", "latest"]);
    let (a, b, c) = within(async {
        tokio::join!(
            client.call("eth_getBalance", params.clone()),
            client.call("eth_getBalance", params.clone()),
            client.call("eth_blockNumber", json!([])),
        )
    })
    .await;
    for result in [a, b, c] {
        assert!(matches!(result, Err(ClientError::NotConnected)), "got {result:?}");
    }
    let stats = client.stats();
    assert_eq!((stats.pending, stats.queued, stats.in_flight_batches), (0, 0, 0));

    // Nothing is left to attach to: a repeat goes through the full path.
    let again = within(client.call("eth_getBalance", params)).await;
    assert!(matches!(again, Err(ClientError::NotConnected)), "got {again:?}");
    client.disconnect().await;
}

#[tokio::test]
async fn oversized_response_is_dropped_and_counted() {
    let node = MockNode::start(Arc::new(|req: &Value| {
        let result = match req["method"].as_str()? {
            "eth_getCode" => format!("0x{}", "ab".repeat(100)),
            other => other.to_string(),
        };
        Some(json!({"jsonrpc": "2.0", "id": req["id"], "result": result}))
    }))
    .await;
    let metrics = Arc::new(Recorder::default());
    let client = builder(&node.path)
        .max_buffer_bytes(128)
        .metrics(metrics.clone())
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let opts = CallOptions::default().timeout(Duration::from_millis(300));
    let err = within(client.call_with("eth_getCode", json!(["0x1", "latest"]), opts))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout { .. }), "got {err:?}");
    assert_eq!(client.stats().buffer_overflows, 1);
    assert_eq!(metrics.count(ConnectionEventKind::BufferOverflow), 1);

    let chain = within(client.call("eth_chainId", json!([]))).await.unwrap();
    assert_eq!(chain, json!("eth_chainId"));
    client.disconnect().await;
}

#[tokio::test]
async fn partial_frame_does_not_survive_reconnect() {
    let node = MockNode::start(echo_method(&[])).await;
    let client = builder(&node.path).build().unwrap();
    client.connect().await.unwrap();

    node.push(r#"{"jsonrpc":"2.0","id":"99","result":""#);
    wait_until(|| client.stats().buffered_bytes > 0).await;

    client.disconnect().await;
    client.connect().await.unwrap();

    let opts = CallOptions::default().timeout(Duration::from_millis(500));
    let chain = within(client.call_with("eth_chainId", json!([]), opts)).await.unwrap();
    assert_eq!(chain, json!("eth_chainId"));
    assert_eq!(client.stats().buffered_bytes, 0);
    client.disconnect().await;
}

#[tokio::test]
async fn disconnect_rejects_pending_and_later_calls() {
    let node = MockNode::start(echo_method(&["eth_getLogs"])).await;
    let client = builder(&node.path).build().unwrap();
    client.connect().await.unwrap();

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.call("eth_getLogs", json!([{"fromBlock": "0x0"}])).await }
    });
    wait_until(|| client.stats().pending == 1).await;

    client.disconnect().await;
    let result = within(pending).await.unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)), "got {result:?}");
    assert!(!client.is_connected());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    let after = client.call("eth_chainId", json!([])).await;
    assert!(matches!(after, Err(ClientError::ConnectionClosed)));

    client.disconnect().await;
}

#[tokio::test]
async fn node_drop_rejects_pending_then_reconnects() {
    let mut node = MockNode::start(echo_method(&["eth_getLogs"])).await;
    let metrics = Arc::new(Recorder::default());
    let client = builder(&node.path).metrics(metrics.clone()).build().unwrap();
    client.connect().await.unwrap();

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.call("eth_getLogs", json!([])).await }
    });
    node.next_line().await;

    node.kick();
    let result = within(pending).await.unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)), "got {result:?}");

    let mut state = client.subscribe_state();
    within(state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap();
    let chain = within(client.call("eth_chainId", json!([]))).await.unwrap();
    assert_eq!(chain, json!("eth_chainId"));

    wait_until(|| metrics.count(ConnectionEventKind::Reconnected) == 1).await;
    assert_eq!(metrics.count(ConnectionEventKind::Disconnected), 1);
    client.disconnect().await;
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let node = MockNode::start(echo_method(&[])).await;
    let metrics = Arc::new(Recorder::default());
    let client = builder(&node.path).metrics(metrics.clone()).build().unwrap();
    client.connect().await.unwrap();

    node.shutdown();
    wait_until(|| metrics.count(ConnectionEventKind::MaxRetriesExceeded) == 1).await;
    assert_eq!(metrics.count(ConnectionEventKind::Reconnecting), 3);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        metrics.count(ConnectionEventKind::Reconnecting),
        3,
        "no attempts without an explicit connect()"
    );

    let err = within(client.call("eth_chainId", json!([]))).await.unwrap_err();
    assert!(matches!(err, ClientError::MaxRetriesExceeded(3)), "got {err:?}");

    // An explicit connect() recovers once the node is back.
    let listener = UnixListener::bind(&node.path).unwrap();
    client.connect().await.unwrap();
    assert!(client.is_connected());
    drop(listener);
    client.disconnect().await;
}
