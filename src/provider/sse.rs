//! Server-sent-events transport.
//!
//! The client opens a long-lived GET stream. The server's first `endpoint`
//! event names the URL that requests are POSTed to; responses come back on
//! the stream as `message` events.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{RpcNotification, RpcRequest, RpcResponse};
use super::transport::{PendingRequests, Transport, await_response};
use super::{TransportKind, expand_env_value};
use crate::error::TransportError;

pub struct SseTransport {
    provider: String,
    http: reqwest::Client,
    endpoint: reqwest::Url,
    headers: HeaderMap,
    pending: PendingRequests,
    next_id: AtomicU64,
    timeout: Duration,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// request endpoint.
    pub async fn connect(
        provider: &str,
        http: reqwest::Client,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let headers = build_headers(headers)?;

        let response = http
            .get(url)
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let base = response.url().clone();

        let pending = PendingRequests::default();
        let cancel = CancellationToken::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader = tokio::spawn(read_events(
            provider.to_string(),
            Box::pin(response.bytes_stream().eventsource()),
            endpoint_tx,
            pending.clone(),
            cancel.clone(),
        ));

        let announced = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(path)) => path,
            Ok(Err(_)) => {
                cancel.cancel();
                return Err(TransportError::Protocol(
                    "event stream ended before announcing an endpoint".into(),
                ));
            }
            Err(_) => {
                cancel.cancel();
                return Err(TransportError::Timeout {
                    method: "endpoint".into(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };
        let endpoint = base
            .join(announced.trim())
            .map_err(|e| TransportError::Protocol(format!("bad endpoint `{announced}`: {e}")))?;

        tracing::info!(provider = %provider, endpoint = %endpoint, "Provider stream open");

        Ok(Self {
            provider: provider.to_string(),
            http,
            endpoint,
            headers,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            cancel,
            reader: Some(reader),
        })
    }

    async fn post(&self, body: String) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "POST {} returned {}",
                self.endpoint,
                response.status()
            )));
        }
        Ok(())
    }
}

async fn read_events<S>(
    provider: String,
    mut events: S,
    endpoint_tx: oneshot::Sender<String>,
    pending: PendingRequests,
    cancel: CancellationToken,
) where
    S: futures::Stream<
            Item = Result<
                eventsource_stream::Event,
                eventsource_stream::EventStreamError<reqwest::Error>,
            >,
        > + Unpin,
{
    let mut endpoint_tx = Some(endpoint_tx);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = events.next() => match next {
                Some(Ok(event)) => match event.event.as_str() {
                    "endpoint" => {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(event.data);
                        }
                    }
                    "message" => match serde_json::from_str::<RpcResponse>(&event.data) {
                        Ok(msg) => {
                            pending.resolve(msg);
                        }
                        Err(e) => {
                            tracing::debug!(provider = %provider, error = %e, "Ignoring malformed event data");
                        }
                    },
                    other => {
                        tracing::trace!(provider = %provider, event = %other, "Ignoring event");
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(provider = %provider, error = %e, "Provider stream failed");
                    break;
                }
                None => {
                    tracing::debug!(provider = %provider, "Provider stream ended");
                    break;
                }
            }
        }
    }
    pending.fail_all();
}

fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| TransportError::Protocol(format!("bad header name `{key}`: {e}")))?;
        let value = HeaderValue::from_str(&expand_env_value(key, value))
            .map_err(|e| TransportError::Protocol(format!("bad header value for `{key}`: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_string(&RpcRequest::new(id, method, params.as_ref()))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let rx = self.pending.register(id);
        if let Err(e) = self.post(body).await {
            self.pending.forget(id);
            return Err(e);
        }
        await_response(&self.pending, id, rx, method, self.timeout).await
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let body = serde_json::to_string(&RpcNotification::new(method, params.as_ref()))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.post(body).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
            tracing::info!(provider = %self.provider, "Provider stream closed");
        }
        self.pending.fail_all();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
