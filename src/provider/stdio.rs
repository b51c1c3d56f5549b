//! Subprocess transport: newline-delimited JSON-RPC over stdin/stdout.
//!
//! The provider runs in its own process group with `kill_on_drop(true)`.
//! Closing drops stdin, gives the process a grace period to exit on its own,
//! then signals the group with SIGTERM and finally SIGKILL.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::protocol::{RpcNotification, RpcRequest, RpcResponse};
use super::transport::{PendingRequests, Transport, await_response};
use super::{TransportKind, expand_env_value};
use crate::error::TransportError;

/// How long a provider gets to exit after its stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// How long a provider gets to exit after SIGTERM.
const TERM_GRACE: Duration = Duration::from_secs(1);

pub struct StdioTransport {
    provider: String,
    child: Option<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingRequests,
    next_id: AtomicU64,
    timeout: Duration,
    readers: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    /// Start the provider process and its reader tasks.
    pub fn spawn(
        provider: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        // process_group(0) requires the CommandExt trait on Unix.
        #[allow(unused_imports)]
        use std::os::unix::process::CommandExt;

        let mut cmd = Command::new(command);
        cmd.args(args)
            .process_group(0)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, expand_env_value(key, value));
        }

        let mut child = cmd.spawn().map_err(|e| TransportError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Protocol("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Protocol("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Protocol("failed to capture stderr".into()))?;

        let pending = PendingRequests::default();

        let stdout_pending = pending.clone();
        let stdout_provider = provider.to_string();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RpcResponse>(line) {
                            Ok(msg) => {
                                if !stdout_pending.resolve(msg) {
                                    tracing::trace!(provider = %stdout_provider, "Unrouted provider message");
                                }
                            }
                            Err(e) => {
                                tracing::debug!(
                                    provider = %stdout_provider,
                                    error = %e,
                                    "Ignoring non-JSON line from provider"
                                );
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(provider = %stdout_provider, error = %e, "Provider stdout read failed");
                        break;
                    }
                }
            }
            // Anyone still waiting will never get an answer.
            stdout_pending.fail_all();
        });

        let stderr_provider = provider.to_string();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(provider = %stderr_provider, "[stderr] {line}");
            }
        });

        tracing::info!(
            provider = %provider,
            command = %command,
            pid = child.id(),
            "Provider process started"
        );

        Ok(Self {
            provider: provider.to_string(),
            child: Some(child),
            stdin: Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            readers: vec![stdout_task, stderr_task],
        })
    }

    async fn write_line(&self, line: String) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&RpcRequest::new(id, method, params.as_ref()))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let rx = self.pending.register(id);
        if let Err(e) = self.write_line(line).await {
            self.pending.forget(id);
            return Err(e);
        }
        tracing::trace!(provider = %self.provider, id, method, "Sent request");

        await_response(&self.pending, id, rx, method, self.timeout).await
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        let line = serde_json::to_string(&RpcNotification::new(method, params.as_ref()))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.write_line(line).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // EOF on stdin is the polite shutdown request.
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let exited = matches!(tokio::time::timeout(EXIT_GRACE, child.wait()).await, Ok(Ok(_)));
        if !exited {
            if let Some(pid) = child.id() {
                let pgid = nix::unistd::Pid::from_raw(pid as i32);
                let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGTERM);
            }
            let terminated =
                matches!(tokio::time::timeout(TERM_GRACE, child.wait()).await, Ok(Ok(_)));
            if !terminated {
                if let Some(pid) = child.id() {
                    let pgid = nix::unistd::Pid::from_raw(pid as i32);
                    let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
                }
                // Reap the child to prevent zombies.
                let _ = child.kill().await;
            }
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.pending.fail_all();
        tracing::info!(provider = %self.provider, graceful = exited, "Provider process closed");
        Ok(())
    }
}
