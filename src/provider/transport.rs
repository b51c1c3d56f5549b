//! Transport seam between the connection manager and concrete channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::protocol::RpcResponse;
use super::sse::SseTransport;
use super::stdio::StdioTransport;
use super::{ProviderConfig, TransportConfig, TransportKind};
use crate::error::TransportError;

/// A live request/response channel to one provider.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Send a request and wait for its result.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError>;

    /// Fire a notification; no response is expected.
    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), TransportError>;

    /// Tear the channel down. Calling it twice is harmless.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports from provider configs.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &ProviderConfig) -> Result<Box<dyn Transport>, TransportError>;
}

/// Opens real subprocess and SSE transports.
#[derive(Clone, Default)]
pub struct DefaultConnector {
    http: reqwest::Client,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(&self, config: &ProviderConfig) -> Result<Box<dyn Transport>, TransportError> {
        match &config.transport {
            TransportConfig::Stdio { command, args, env } => {
                let transport =
                    StdioTransport::spawn(&config.name, command, args, env, config.request_timeout)?;
                Ok(Box::new(transport))
            }
            TransportConfig::Sse { url, headers } => {
                let transport = SseTransport::connect(
                    &config.name,
                    self.http.clone(),
                    url,
                    headers,
                    config.request_timeout,
                )
                .await?;
                Ok(Box::new(transport))
            }
        }
    }
}

/// In-flight requests awaiting a response, keyed by JSON-RPC id.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>,
}

impl PendingRequests {
    pub fn register(&self, id: u64) -> oneshot::Receiver<RpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    pub fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Route an inbound message to its waiter. Returns false for messages
    /// nobody is waiting on.
    pub fn resolve(&self, response: RpcResponse) -> bool {
        let Some(id) = response.response_id() else {
            return false;
        };
        match self.lock().remove(&id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub fn fail_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcResponse>>> {
        // Recover from poisoning so responses are still routed.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Wait for a registered response, bounded by `timeout`.
pub async fn await_response(
    pending: &PendingRequests,
    id: u64,
    rx: oneshot::Receiver<RpcResponse>,
    method: &str,
    timeout: Duration,
) -> Result<serde_json::Value, TransportError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => response.into_result(),
        Ok(Err(_)) => Err(TransportError::Closed),
        Err(_) => {
            pending.forget(id);
            Err(TransportError::Timeout {
                method: method.to_string(),
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}
