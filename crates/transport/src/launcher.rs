//! Worker process launching.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use proto::TransportError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Write half of the worker's standard input.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Read half of one of the worker's output streams.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// The three streams of a freshly launched worker plus its process handle.
pub struct WorkerStreams {
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    pub handle: Box<dyn WorkerHandle>,
}

/// Liveness and termination control over a launched worker.
#[async_trait]
pub trait WorkerHandle: Send {
    /// Returns `true` once the worker has exited.
    fn has_exited(&mut self) -> bool;

    /// Waits up to `grace` for the worker to exit on its own, then force-kills it.
    ///
    /// Callers close the worker's stdin before calling this, which is the
    /// graceful termination request line-oriented workers react to.
    async fn shutdown(&mut self, grace: Duration);
}

/// Produces worker processes for the transport.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launches one worker. Failures are reported as connection errors.
    async fn launch(&self) -> Result<WorkerStreams, TransportError>;
}

/// Launches the worker as a child process speaking JSON-RPC over stdio.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Creates a launcher for `program` invoked with `args` (e.g. `["--stdio"]`).
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Path of the worker executable.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<WorkerStreams, TransportError> {
        // Bare command names are resolved through PATH by the OS.
        if self.program.components().count() > 1 && !self.program.exists() {
            return Err(TransportError::Connection(format!(
                "worker executable not found at '{}'",
                self.program.display()
            )));
        }

        info!(
            program = %self.program.display(),
            args = ?self.args,
            "Launching worker process"
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Connection(format!("failed to spawn worker: {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| missing_stream("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_stream("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_stream("stderr"))?;
        debug!(pid = ?child.id(), "Worker process spawned");

        Ok(WorkerStreams {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            handle: Box::new(ChildHandle { child }),
        })
    }
}

fn missing_stream(name: &str) -> TransportError {
    TransportError::Connection(format!("worker {name} unavailable after spawn"))
}

/// [`WorkerHandle`] over a tokio child process.
struct ChildHandle {
    child: Child,
}

#[async_trait]
impl WorkerHandle for ChildHandle {
    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "Worker process has exited");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to poll worker process status: {e}");
                true
            }
        }
    }

    async fn shutdown(&mut self, grace: Duration) {
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!(%status, "Worker process exited"),
            Ok(Err(e)) => warn!("Failed waiting for worker exit: {e}"),
            Err(_) => {
                warn!(
                    "Worker did not exit within {}ms, killing process",
                    grace.as_millis()
                );
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill worker process: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_is_a_connection_error() {
        let launcher = ProcessLauncher::new("/nonexistent/dir/worker", vec!["--stdio".into()]);
        let err = match launcher.launch().await {
            Ok(_) => panic!("launch should fail"),
            Err(e) => e,
        };
        assert!(err.is_connection());
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn program_path_is_kept() {
        let launcher = ProcessLauncher::new("bin/worker", vec![]);
        assert_eq!(launcher.program(), Path::new("bin/worker"));
    }
}
