use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use proto::TransportError;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Completion slot for one in-flight request.
pub(crate) type Completion = oneshot::Receiver<Result<Value, TransportError>>;

struct PendingRequest {
    created_at: Instant,
    completion: oneshot::Sender<Result<Value, TransportError>>,
}

/// State shared between the client and its stdout reader task.
///
/// Ids are UUID strings, so a contended map with short critical sections is
/// all the correlation table needs.
#[derive(Default)]
pub(crate) struct SharedState {
    pending: DashMap<String, PendingRequest>,
    connection_lost: AtomicBool,
}

impl SharedState {
    /// Registers a completion slot for `id`. An id already in flight is refused.
    pub(crate) fn register(&self, id: &str) -> Result<Completion, TransportError> {
        match self.pending.entry(id.to_string()) {
            Entry::Occupied(_) => Err(TransportError::Protocol(format!(
                "request id '{id}' is already in flight"
            ))),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(PendingRequest {
                    created_at: Instant::now(),
                    completion: tx,
                });
                Ok(rx)
            }
        }
    }

    /// Completes the request registered under `id` with `message`.
    ///
    /// Hands the message back when no request is waiting for it.
    pub(crate) fn resolve(&self, id: &str, message: Value) -> Result<(), Value> {
        let Some((_, pending)) = self.pending.remove(id) else {
            return Err(message);
        };
        debug!(
            id,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "<- Worker response correlated"
        );
        if pending.completion.send(Ok(message)).is_err() {
            debug!(id, "Requester went away before the response arrived");
        }
        Ok(())
    }

    /// Drops the slot for `id` without completing it.
    pub(crate) fn forget(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Completes every in-flight request with `err`. Returns how many were failed.
    pub(crate) fn fail_all(&self, err: &TransportError) -> usize {
        let ids: Vec<String> = self
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.completion.send(Err(err.clone()));
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(failed, "Failed in-flight worker requests: {err}");
        }
        failed
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Marks the connection as lost. Stays set until the next successful launch.
    pub(crate) fn latch_lost(&self) {
        self.connection_lost.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset_lost(&self) {
        self.connection_lost.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.connection_lost.load(Ordering::SeqCst)
    }
}
