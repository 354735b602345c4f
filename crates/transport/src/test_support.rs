//! In-memory worker used by the transport tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proto::TransportError;
use proto::rpc::PROTOCOL_VERSION;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Instant, sleep};

use crate::launcher::{WorkerHandle, WorkerLauncher, WorkerStreams};

/// Behaviour switches for the fake worker.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeWorkerOptions {
    /// Answer `initialize` with a JSON-RPC error.
    pub reject_initialize: bool,
    /// Report the process as exited right after launch.
    pub exit_on_launch: bool,
}

/// Launcher producing fake workers wired up through in-memory pipes.
///
/// The fake worker understands:
/// - `initialize`: answers with the protocol version (or an error)
/// - `tools/call`: answers with a successful content envelope
/// - `silent`: never answers
/// - `crash` (request or notification): exits, closing its stdout
/// - `close_stdin` (request or notification): stops reading stdin, keeps stdout open
/// - anything else: echoes `params` back as `result` after `params.delay_ms`
pub(crate) struct MemoryLauncher {
    options: FakeWorkerOptions,
    fail_first: u32,
    launches: AtomicU32,
    launch_times: parking_lot::Mutex<Vec<Instant>>,
    received: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl MemoryLauncher {
    pub(crate) fn new(options: FakeWorkerOptions) -> Self {
        Self {
            options,
            fail_first: 0,
            launches: AtomicU32::new(0),
            launch_times: parking_lot::Mutex::new(Vec::new()),
            received: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// A launcher whose first `fail_first` launches fail.
    pub(crate) fn failing(fail_first: u32) -> Self {
        Self {
            fail_first,
            ..Self::new(FakeWorkerOptions::default())
        }
    }

    pub(crate) fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Time elapsed between consecutive launch attempts.
    pub(crate) fn launch_gaps(&self) -> Vec<Duration> {
        self.launch_times
            .lock()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }

    /// Methods received by any fake worker, in arrival order.
    pub(crate) fn received_methods(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl WorkerLauncher for MemoryLauncher {
    async fn launch(&self) -> Result<WorkerStreams, TransportError> {
        self.launch_times.lock().push(Instant::now());
        let attempt = self.launches.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(TransportError::Connection(
                "simulated launch failure".to_string(),
            ));
        }

        let (client_stdin, worker_stdin) = tokio::io::duplex(64 * 1024);
        let (worker_stdout, client_stdout) = tokio::io::duplex(64 * 1024);
        let (mut worker_stderr, client_stderr) = tokio::io::duplex(1024);
        let exited = Arc::new(AtomicBool::new(self.options.exit_on_launch));

        tokio::spawn(async move {
            let _ = worker_stderr
                .write_all(b"fake worker listening on stdio\n")
                .await;
        });
        tokio::spawn(run_fake_worker(
            worker_stdin,
            worker_stdout,
            self.options.clone(),
            Arc::clone(&self.received),
            Arc::clone(&exited),
        ));

        Ok(WorkerStreams {
            stdin: Box::new(client_stdin),
            stdout: Box::new(client_stdout),
            stderr: Box::new(client_stderr),
            handle: Box::new(MemoryHandle { exited }),
        })
    }
}

struct MemoryHandle {
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl WorkerHandle for MemoryHandle {
    fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    async fn shutdown(&mut self, _grace: Duration) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

async fn run_fake_worker(
    stdin: DuplexStream,
    stdout: DuplexStream,
    options: FakeWorkerOptions,
    received: Arc<parking_lot::Mutex<Vec<String>>>,
    exited: Arc<AtomicBool>,
) {
    if options.exit_on_launch {
        return;
    }

    let stdout = Arc::new(AsyncMutex::new(stdout));
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let method = message["method"].as_str().unwrap_or_default().to_string();
        received.lock().push(method.clone());

        if method == "close_stdin" {
            drop(lines);
            // Hold stdout open without ever answering again.
            let _stdout = stdout;
            std::future::pending::<()>().await;
            return;
        }

        let Some(id) = message.get("id").cloned() else {
            if method == "crash" {
                break;
            }
            continue;
        };
        match method.as_str() {
            "crash" => break,
            "silent" => {}
            "initialize" => {
                let reply = if options.reject_initialize {
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32600, "message": "unsupported client" }
                    })
                } else {
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": PROTOCOL_VERSION,
                            "capabilities": {},
                            "serverInfo": { "name": "fake-worker" }
                        }
                    })
                };
                write_reply(&stdout, &reply).await;
            }
            "tools/call" => {
                let name = message["params"]["name"].as_str().unwrap_or_default();
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{ "type": "text", "text": format!("ran {name}") }],
                        "isError": false
                    }
                });
                write_reply(&stdout, &reply).await;
            }
            _ => {
                let params = message["params"].clone();
                let delay = params["delay_ms"].as_u64().unwrap_or(0);
                let out = Arc::clone(&stdout);
                tokio::spawn(async move {
                    sleep(Duration::from_millis(delay)).await;
                    let reply = json!({ "jsonrpc": "2.0", "id": id, "result": params });
                    write_reply(&out, &reply).await;
                });
            }
        }
    }
    exited.store(true, Ordering::SeqCst);
}

async fn write_reply(stdout: &AsyncMutex<DuplexStream>, reply: &Value) {
    let mut line = reply.to_string();
    line.push('\n');
    let mut out = stdout.lock().await;
    let _ = out.write_all(line.as_bytes()).await;
    let _ = out.flush().await;
}
