//! Background tasks draining the worker's output streams.

use std::sync::Arc;
use std::time::Duration;

use proto::TransportError;
use proto::rpc::message_id;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::launcher::BoxedReader;
use crate::pending::SharedState;

/// Reads response lines from worker stdout and completes pending requests.
///
/// Runs until EOF, a read error, or a poll tick that finds the connection
/// already marked lost. EOF and read errors latch the loss and fail every
/// in-flight request.
pub(crate) async fn read_stdout(stdout: BoxedReader, shared: Arc<SharedState>, poll: Duration) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match timeout(poll, lines.next_line()).await {
            Err(_) => {
                if shared.is_lost() {
                    debug!("Connection marked lost, stopping stdout reader");
                    shared.fail_all(&TransportError::Connection(
                        "worker connection was lost".to_string(),
                    ));
                    break;
                }
            }
            Ok(Ok(Some(line))) => {
                let line = line.trim();
                if !line.is_empty() {
                    dispatch_line(&shared, line);
                }
            }
            Ok(Ok(None)) => {
                warn!("Worker stdout reached EOF, worker process likely terminated");
                shared.latch_lost();
                shared.fail_all(&TransportError::Connection(
                    "worker stdout closed".to_string(),
                ));
                break;
            }
            Ok(Err(e)) => {
                error!("Error reading worker stdout: {e}");
                shared.latch_lost();
                shared.fail_all(&TransportError::Connection(format!(
                    "error reading worker stdout: {e}"
                )));
                break;
            }
        }
    }
    info!("Worker stdout reader finished");
}

/// Routes one stdout line to the request waiting for it.
pub(crate) fn dispatch_line(shared: &SharedState, line: &str) {
    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!("Skipping non-JSON line from worker ({e}): {line}");
            return;
        }
    };

    match message_id(&message).map(str::to_owned) {
        Some(id) => {
            if let Err(message) = shared.resolve(&id, message) {
                warn!(id, "Response for unknown or expired request: {message}");
            }
        }
        None => debug!("Unsolicited worker message: {message}"),
    }
}

/// Forwards worker stderr lines to the log.
pub(crate) async fn read_stderr(stderr: BoxedReader) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                info!("Worker stderr reached EOF");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    warn!(target: "worker_stderr", "{line}");
                }
            }
            Err(e) => {
                warn!("Error reading worker stderr: {e}");
                break;
            }
        }
    }
}
