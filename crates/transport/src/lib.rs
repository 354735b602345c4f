//! JSON-RPC transport to the out-of-process tool worker.
//!
//! The worker is a child process exchanging newline-delimited JSON-RPC 2.0
//! messages over stdio. [`WorkerClient`] owns its lifecycle (launch,
//! handshake, reconnect, shutdown) and correlates concurrent requests with
//! their responses.

mod client;
mod launcher;
mod pending;
mod reader;
#[cfg(test)]
mod test_support;

use std::time::Duration;

use async_trait::async_trait;
use proto::TransportError;
use serde_json::Value;

pub use client::{ConnectionState, TransportSettings, WorkerClient};
pub use launcher::{
    BoxedReader, BoxedWriter, ProcessLauncher, WorkerHandle, WorkerLauncher, WorkerStreams,
};

/// The slice of the worker connection the tool pipeline and agent loop depend on.
#[async_trait]
pub trait WorkerRpc: Send + Sync {
    /// Sends a `tools/call` request and returns the full response message.
    async fn send_tool_execution_request(
        &self,
        tool_name: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<Value, TransportError>;

    /// `true` while the worker is running and its connection is usable.
    fn is_alive(&self) -> bool;

    /// Relaunches the worker. Returns `true` once it is ready again.
    async fn reconnect(&self, max_attempts: u32) -> bool;
}
