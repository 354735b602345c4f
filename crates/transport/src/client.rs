use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proto::TransportError;
use proto::rpc::{
    self, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, PROTOCOL_VERSION,
    RpcNotification, RpcRequest,
};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::WorkerRpc;
use crate::launcher::{BoxedWriter, WorkerHandle, WorkerLauncher, WorkerStreams};
use crate::pending::SharedState;
use crate::reader;

/// Timing and identity knobs for [`WorkerClient`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Pause after launch before probing liveness.
    pub settle_delay: Duration,
    /// Delay before the second start attempt; grows by `start_backoff_step` per attempt.
    pub start_backoff_base: Duration,
    pub start_backoff_step: Duration,
    /// Delay before the second reconnect attempt; grows by `reconnect_backoff_step` per attempt.
    pub reconnect_backoff_base: Duration,
    pub reconnect_backoff_step: Duration,
    /// Deadline for the `initialize` response.
    pub handshake_timeout: Duration,
    /// How long a closed-stdin worker gets to exit before it is killed.
    pub shutdown_grace: Duration,
    /// How often the stdout reader rechecks the lost flag while idle.
    pub read_poll_interval: Duration,
    pub client_name: String,
    pub client_version: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            start_backoff_base: Duration::from_secs(2),
            start_backoff_step: Duration::from_secs(1),
            reconnect_backoff_base: Duration::from_secs(3),
            reconnect_backoff_step: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
            read_poll_interval: Duration::from_secs(5),
            client_name: "tool-broker".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Lifecycle phase of the worker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    Starting,
    Handshaking,
    Ready,
    /// Was ready, but the connection has since been lost.
    Degraded,
    Reconnecting,
}

struct LiveWorker {
    writer: Arc<AsyncMutex<BoxedWriter>>,
    handle: Box<dyn WorkerHandle>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// Client end of the JSON-RPC channel to one worker process.
///
/// Requests may be issued concurrently from many tasks; each one is
/// correlated with its response by a fresh UUID. Writes are serialized so
/// lines never interleave on the worker's stdin.
pub struct WorkerClient {
    launcher: Arc<dyn WorkerLauncher>,
    settings: TransportSettings,
    shared: Arc<SharedState>,
    worker: parking_lot::Mutex<Option<LiveWorker>>,
    state: parking_lot::Mutex<ConnectionState>,
    lifecycle: AsyncMutex<()>,
}

impl WorkerClient {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, settings: TransportSettings) -> Self {
        Self {
            launcher,
            settings,
            shared: Arc::new(SharedState::default()),
            worker: parking_lot::Mutex::new(None),
            state: parking_lot::Mutex::new(ConnectionState::Stopped),
            lifecycle: AsyncMutex::new(()),
        }
    }

    /// Current lifecycle phase. A ready connection whose loss has been
    /// detected reports [`ConnectionState::Degraded`].
    pub fn state(&self) -> ConnectionState {
        let state = *self.state.lock();
        if state == ConnectionState::Ready && !self.is_alive() {
            ConnectionState::Degraded
        } else {
            state
        }
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending_count()
    }

    /// `true` when a worker is running and the connection has not been marked lost.
    pub fn is_alive(&self) -> bool {
        if self.shared.is_lost() {
            return false;
        }
        let mut worker = self.worker.lock();
        match worker.as_mut() {
            Some(live) => !live.handle.has_exited(),
            None => false,
        }
    }

    /// Launches the worker and performs the handshake, retrying up to `max_attempts` times.
    pub async fn start(&self, max_attempts: u32) -> Result<(), TransportError> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut last_error = None;
        for attempt in 0..max_attempts {
            info!("Worker startup attempt {}/{}", attempt + 1, max_attempts);
            match self.connect(ConnectionState::Starting).await {
                Ok(()) => {
                    info!("Worker started and initialized");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Worker startup attempt {} failed: {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
            if attempt + 1 < max_attempts {
                let delay =
                    self.settings.start_backoff_base + self.settings.start_backoff_step * attempt;
                info!("Retrying worker startup in {}ms", delay.as_millis());
                sleep(delay).await;
            }
        }

        self.set_state(ConnectionState::Stopped);
        let reason = last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string());
        error!("Failed to start and initialize worker after {max_attempts} attempts");
        Err(TransportError::Connection(format!(
            "failed to start and initialize worker after {max_attempts} attempts: {reason}"
        )))
    }

    /// Closes the worker's stdin, waits briefly for it to exit, then kills it.
    /// In-flight requests fail with a connection error.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Stopping worker");
        self.teardown("worker client stopped").await;
        self.set_state(ConnectionState::Stopped);
        info!("Worker stopped");
    }

    /// Tears down the current worker and tries to bring up a new one.
    ///
    /// Returns `true` once a relaunched worker completes its handshake.
    pub async fn reconnect(&self, max_attempts: u32) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Attempting to reconnect to worker");
        self.set_state(ConnectionState::Reconnecting);
        self.teardown("worker connection is being re-established").await;
        self.shared.latch_lost();

        for attempt in 0..max_attempts {
            info!("Reconnect attempt {}/{}", attempt + 1, max_attempts);
            match self.connect(ConnectionState::Reconnecting).await {
                Ok(()) => {
                    info!("Reconnected to worker");
                    return true;
                }
                Err(e) => warn!("Reconnect attempt {} failed: {e}", attempt + 1),
            }
            if attempt + 1 < max_attempts {
                let delay = self.settings.reconnect_backoff_base
                    + self.settings.reconnect_backoff_step * attempt;
                info!("Next reconnect attempt in {}ms", delay.as_millis());
                sleep(delay).await;
            }
        }

        self.set_state(ConnectionState::Stopped);
        error!("Failed to reconnect to worker after {max_attempts} attempts");
        false
    }

    /// Sends a request with a fresh id and waits up to `deadline` for its response.
    ///
    /// Returns the full response message (carrying `result` or `error`).
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, TransportError> {
        let id = Uuid::new_v4().to_string();
        self.send_request_with_id(&id, method, params, deadline)
            .await
    }

    /// Asks the worker to run `tool_name` with `arguments`.
    pub async fn send_tool_execution_request(
        &self,
        tool_name: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<Value, TransportError> {
        debug!(tool = tool_name, "Sending tool execution request");
        self.send_request(
            METHOD_TOOLS_CALL,
            rpc::tool_call_params(tool_name, arguments),
            deadline,
        )
        .await
    }

    /// Sends a notification. No response is expected.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let Some(writer) = self.live_writer() else {
            return Err(self.connection_failed(format!(
                "cannot send notification '{method}': worker is not running"
            )));
        };
        let line = rpc::encode_line(&RpcNotification::new(method, params)).map_err(|e| {
            TransportError::Protocol(format!("failed to encode notification: {e}"))
        })?;
        let written = write_line(&writer, &line).await;
        drop(writer);
        if let Err(e) = written {
            return Err(self.connection_failed(format!(
                "connection lost while sending notification '{method}': {e}"
            )));
        }
        debug!(method, "-> Sent worker notification");
        Ok(())
    }

    pub(crate) async fn send_request_with_id(
        &self,
        id: &str,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, TransportError> {
        let Some(writer) = self.live_writer() else {
            return Err(self.connection_failed(format!(
                "worker is not running or its stdin is unavailable (request '{method}')"
            )));
        };

        let completion = self.shared.register(id)?;
        let line = match rpc::encode_line(&RpcRequest::new(id, method, params)) {
            Ok(line) => line,
            Err(e) => {
                self.shared.forget(id);
                return Err(TransportError::Protocol(format!("failed to encode request: {e}")));
            }
        };
        let written = write_line(&writer, &line).await;
        drop(writer);
        if let Err(e) = written {
            return Err(self.connection_failed(format!(
                "connection lost while sending '{method}' ({id}): {e}"
            )));
        }
        debug!(id, method, "-> Sent worker request");

        match timeout(deadline, completion).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::Connection(format!(
                "request '{method}' ({id}) was abandoned without a response"
            ))),
            Err(_) => {
                self.shared.forget(id);
                error!(id, method, "Timeout waiting for worker response");
                Err(TransportError::Timeout {
                    method: method.to_string(),
                    after: deadline,
                })
            }
        }
    }

    async fn connect(&self, phase: ConnectionState) -> Result<(), TransportError> {
        self.set_state(phase);
        let streams = self.launcher.launch().await?;
        self.install(streams);

        sleep(self.settings.settle_delay).await;
        if !self.is_alive() {
            self.teardown("worker exited during startup").await;
            return Err(TransportError::Connection(
                "worker terminated unexpectedly after launch".to_string(),
            ));
        }

        self.set_state(ConnectionState::Handshaking);
        if let Err(e) = self.handshake().await {
            error!("Worker handshake failed: {e}");
            self.teardown("worker handshake failed").await;
            return Err(e);
        }
        self.set_state(ConnectionState::Ready);
        Ok(())
    }

    async fn handshake(&self) -> Result<(), TransportError> {
        info!("Initializing worker session");
        let params = rpc::initialize_params(&self.settings.client_name, &self.settings.client_version);
        let response = self
            .send_request(METHOD_INITIALIZE, params, self.settings.handshake_timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout { after, .. } => TransportError::Connection(format!(
                    "worker did not answer initialize within {after:?}"
                )),
                other => other,
            })?;

        if let Some(err) = response.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(TransportError::Connection(format!(
                "worker rejected initialize: {message}"
            )));
        }

        let announced = response
            .get("result")
            .and_then(|result| result.get("protocolVersion"))
            .and_then(Value::as_str);
        if announced != Some(PROTOCOL_VERSION) {
            warn!(
                expected = PROTOCOL_VERSION,
                announced = ?announced,
                "Worker announced a different protocol version"
            );
        }

        self.send_notification(METHOD_INITIALIZED, json!({})).await?;
        info!("Worker session initialized");
        Ok(())
    }

    fn install(&self, streams: WorkerStreams) {
        let WorkerStreams {
            stdin,
            stdout,
            stderr,
            handle,
        } = streams;
        self.shared.reset_lost();
        let stdout_task = tokio::spawn(reader::read_stdout(
            stdout,
            Arc::clone(&self.shared),
            self.settings.read_poll_interval,
        ));
        let stderr_task = tokio::spawn(reader::read_stderr(stderr));

        let previous = self.worker.lock().replace(LiveWorker {
            writer: Arc::new(AsyncMutex::new(stdin)),
            handle,
            stdout_task,
            stderr_task,
        });
        if let Some(previous) = previous {
            previous.stdout_task.abort();
            previous.stderr_task.abort();
        }
    }

    async fn teardown(&self, reason: &str) {
        let live = self.worker.lock().take();
        if let Some(LiveWorker {
            writer,
            mut handle,
            stdout_task,
            stderr_task,
        }) = live
        {
            stdout_task.abort();
            stderr_task.abort();
            // Closing stdin asks the worker to exit.
            drop(writer);
            handle.shutdown(self.settings.shutdown_grace).await;
        }
        self.shared
            .fail_all(&TransportError::Connection(reason.to_string()));
    }

    fn live_writer(&self) -> Option<Arc<AsyncMutex<BoxedWriter>>> {
        if self.shared.is_lost() {
            return None;
        }
        let mut worker = self.worker.lock();
        let live = worker.as_mut()?;
        if live.handle.has_exited() {
            return None;
        }
        Some(Arc::clone(&live.writer))
    }

    fn connection_failed(&self, msg: String) -> TransportError {
        error!("{msg}");
        self.shared.latch_lost();
        let err = TransportError::Connection(msg);
        self.shared.fail_all(&err);
        err
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Worker connection state changed");
        }
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        if let Some(live) = self.worker.get_mut().take() {
            live.stdout_task.abort();
            live.stderr_task.abort();
        }
    }
}

async fn write_line(writer: &AsyncMutex<BoxedWriter>, line: &str) -> std::io::Result<()> {
    let mut stdin = writer.lock().await;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

#[async_trait]
impl WorkerRpc for WorkerClient {
    async fn send_tool_execution_request(
        &self,
        tool_name: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<Value, TransportError> {
        WorkerClient::send_tool_execution_request(self, tool_name, arguments, deadline).await
    }

    fn is_alive(&self) -> bool {
        WorkerClient::is_alive(self)
    }

    async fn reconnect(&self, max_attempts: u32) -> bool {
        WorkerClient::reconnect(self, max_attempts).await
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;
    use tokio::time::Instant;

    use super::*;
    use crate::test_support::{FakeWorkerOptions, MemoryLauncher};

    fn client_for(launcher: &Arc<MemoryLauncher>) -> WorkerClient {
        WorkerClient::new(
            Arc::clone(launcher) as Arc<dyn WorkerLauncher>,
            TransportSettings::default(),
        )
    }

    async fn ready_client() -> (Arc<MemoryLauncher>, WorkerClient) {
        let launcher = Arc::new(MemoryLauncher::new(FakeWorkerOptions::default()));
        let client = client_for(&launcher);
        client.start(1).await.expect("start");
        (launcher, client)
    }

    #[tokio::test(start_paused = true)]
    async fn start_completes_handshake_and_sends_initialized() {
        let (launcher, client) = ready_client().await;
        assert_eq!(client.state(), ConnectionState::Ready);
        assert!(client.is_alive());
        assert_eq!(launcher.launches(), 1);

        // Give the fake worker a moment to record the notification.
        sleep(Duration::from_millis(10)).await;
        assert_eq!(
            launcher.received_methods(),
            vec![METHOD_INITIALIZE.to_string(), METHOD_INITIALIZED.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_are_correlated_by_id() {
        let (_launcher, client) = ready_client().await;

        let requests = (0..10u64).map(|n| {
            client.send_request(
                "echo",
                json!({ "n": n, "delay_ms": (10 - n) * 20 }),
                Duration::from_secs(5),
            )
        });
        let responses = join_all(requests).await;

        for (n, response) in responses.into_iter().enumerate() {
            let response = response.expect("echo response");
            assert_eq!(response["result"]["n"], json!(n));
        }
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_in_flight_id_is_refused() {
        let (_launcher, client) = ready_client().await;

        let (first, second) = tokio::join!(
            client.send_request_with_id(
                "dup",
                "echo",
                json!({ "n": 1, "delay_ms": 50 }),
                Duration::from_secs(5)
            ),
            async {
                sleep(Duration::from_millis(10)).await;
                client
                    .send_request_with_id("dup", "echo", json!({ "n": 2 }), Duration::from_secs(5))
                    .await
            }
        );

        assert_eq!(first.expect("first request")["result"]["n"], json!(1));
        assert!(matches!(second, Err(TransportError::Protocol(_))));
        assert!(client.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_one_request_without_latching_loss() {
        let (_launcher, client) = ready_client().await;

        let err = client
            .send_request("silent", json!({}), Duration::from_secs(1))
            .await
            .expect_err("no response expected");
        assert!(err.is_timeout());
        assert_eq!(client.pending_requests(), 0);
        assert!(client.is_alive());

        let ok = client
            .send_request("echo", json!({ "n": 5 }), Duration::from_secs(1))
            .await
            .expect("connection still usable");
        assert_eq!(ok["result"]["n"], json!(5));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_exit_fails_in_flight_requests_and_degrades() {
        let (_launcher, client) = ready_client().await;

        let (pending, _) = tokio::join!(
            client.send_request("silent", json!({}), Duration::from_secs(30)),
            async {
                sleep(Duration::from_millis(10)).await;
                let _ = client.send_notification("crash", json!({})).await;
            }
        );

        let err = pending.expect_err("worker went away");
        assert!(err.is_connection());
        assert!(!client.is_alive());
        assert_eq!(client.state(), ConnectionState::Degraded);

        let err = client
            .send_request("echo", json!({}), Duration::from_secs(1))
            .await
            .expect_err("no worker");
        assert!(err.is_connection());
    }

    #[tokio::test(start_paused = true)]
    async fn broken_stdin_fails_in_flight_requests_as_connection_errors() {
        let (_launcher, client) = ready_client().await;

        let (pending, notified) = tokio::join!(
            client.send_request("silent", json!({}), Duration::from_secs(30)),
            async {
                sleep(Duration::from_millis(10)).await;
                client
                    .send_notification("close_stdin", json!({}))
                    .await
                    .expect("worker still reading");
                sleep(Duration::from_millis(10)).await;
                client.send_notification("ping", json!({})).await
            }
        );

        assert!(notified.expect_err("stdin is closed").is_connection());
        let err = pending.expect_err("request cannot complete");
        assert!(err.is_connection(), "{err}");
        assert_eq!(client.pending_requests(), 0);
        assert!(!client.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_initialize_fails_start() {
        let launcher = Arc::new(MemoryLauncher::new(FakeWorkerOptions {
            reject_initialize: true,
            ..FakeWorkerOptions::default()
        }));
        let client = client_for(&launcher);

        let err = client.start(2).await.expect_err("handshake rejected");
        assert!(err.to_string().contains("rejected initialize"));
        assert_eq!(launcher.launches(), 2);
        assert_eq!(client.state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_dying_during_settle_fails_the_attempt() {
        let launcher = Arc::new(MemoryLauncher::new(FakeWorkerOptions {
            exit_on_launch: true,
            ..FakeWorkerOptions::default()
        }));
        let client = client_for(&launcher);

        let err = client.start(1).await.expect_err("worker exited");
        assert!(err.is_connection());
        assert!(!client.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn start_backoff_grows_between_attempts() {
        let launcher = Arc::new(MemoryLauncher::failing(u32::MAX));
        let client = client_for(&launcher);

        client.start(3).await.expect_err("every launch fails");
        let gaps = launcher.launch_gaps();
        assert_eq!(gaps, vec![Duration::from_secs(2), Duration::from_secs(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_with_increasing_delays() {
        let launcher = Arc::new(MemoryLauncher::failing(u32::MAX));
        let client = client_for(&launcher);

        let started = Instant::now();
        assert!(!client.reconnect(3).await);
        assert_eq!(launcher.launches(), 3);

        let gaps = launcher.launch_gaps();
        assert_eq!(gaps, vec![Duration::from_secs(3), Duration::from_secs(5)]);
        assert!(gaps[1] > gaps[0]);
        assert!(started.elapsed() >= Duration::from_secs(8));
        assert_eq!(client.state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_succeeds_on_second_attempt() {
        let launcher = Arc::new(MemoryLauncher::failing(1));
        let client = client_for(&launcher);

        assert!(client.reconnect(3).await);
        assert_eq!(launcher.launches(), 2);
        assert!(client.is_alive());
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replaces_a_dead_worker() {
        let (launcher, client) = ready_client().await;
        let _ = client.send_notification("crash", json!({})).await;
        sleep(Duration::from_millis(10)).await;
        assert!(!client.is_alive());

        assert!(client.reconnect(2).await);
        assert_eq!(launcher.launches(), 2);
        let response = client
            .send_tool_execution_request("get_selection", json!({}), Duration::from_secs(5))
            .await
            .expect("tool call after reconnect");
        assert_eq!(response["result"]["isError"], json!(false));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_fails_pending_and_marks_stopped() {
        let (_launcher, client) = ready_client().await;

        let (pending, _) = tokio::join!(
            client.send_request("silent", json!({}), Duration::from_secs(30)),
            async {
                sleep(Duration::from_millis(10)).await;
                client.stop().await;
            }
        );

        assert!(pending.expect_err("stopped").is_connection());
        assert_eq!(client.state(), ConnectionState::Stopped);
        assert!(!client.is_alive());
    }
}
