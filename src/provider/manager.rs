//! Opens, uses and closes provider connections.
//!
//! Connections are never pooled: each spawn invocation opens its own and
//! closes them before returning. [`ConnectionStats`] counts both sides so
//! that balance can be checked.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;

use super::protocol::{ProviderTool, ToolsPage, initialize_params, parse_call_result};
use super::transport::{Connector, Transport};
use super::{ProviderConfig, TransportKind, split_namespaced};
use crate::error::ProviderConnectionError;
use crate::tools::ToolOutput;

/// Upper bound on `tools/list` pages followed per provider.
const MAX_LIST_PAGES: usize = 32;

/// Channel counters. `opened` increments once a transport is live; `closed`
/// increments when that transport is torn down, whatever the outcome.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl ConnectionStats {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Channels currently open.
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }
}

/// A live, initialized channel to one provider.
pub struct ProviderConnection {
    name: String,
    kind: TransportKind,
    transport: Box<dyn Transport>,
    tools: Vec<ProviderTool>,
}

impl ProviderConnection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn tools(&self) -> &[ProviderTool] {
        &self.tools
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool)
    }

    /// Invoke one tool. Transport and server failures come back as a flagged
    /// output rather than an error.
    pub async fn call_tool(&self, tool: &str, input: serde_json::Value) -> ToolOutput {
        let params = serde_json::json!({
            "name": tool,
            "arguments": input,
        });
        match self.transport.request("tools/call", Some(params)).await {
            Ok(result) => parse_call_result(result),
            Err(e) => {
                tracing::warn!(provider = %self.name, tool = %tool, error = %e, "Tool call failed");
                ToolOutput::error(format!("Tool `{tool}` on provider `{}` failed: {e}", self.name))
            }
        }
    }
}

impl std::fmt::Debug for ProviderConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConnection")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Outcome of [`ConnectionManager::connect_many`].
#[derive(Debug, Default)]
pub struct BatchConnect {
    pub connections: Vec<ProviderConnection>,
    pub failures: Vec<ProviderConnectionError>,
}

/// Connects to configured providers.
///
/// All fields are behind `Arc`, so the struct is cheap to clone into tasks.
#[derive(Clone)]
pub struct ConnectionManager {
    providers: Arc<BTreeMap<String, ProviderConfig>>,
    connector: Arc<dyn Connector>,
    stats: Arc<ConnectionStats>,
}

impl ConnectionManager {
    pub fn new(
        providers: BTreeMap<String, ProviderConfig>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            providers: Arc::new(providers),
            connector,
            stats: Arc::new(ConnectionStats::default()),
        }
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values()
    }

    /// Open, initialize and list one provider.
    ///
    /// A channel that opened but failed the handshake or listing is closed
    /// before the error is returned.
    pub async fn connect(&self, name: &str) -> Result<ProviderConnection, ProviderConnectionError> {
        let config = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderConnectionError::Unconfigured {
                provider: name.to_string(),
            })?;

        self.stats.attempts.fetch_add(1, Ordering::SeqCst);
        let mut transport = self.connector.open(config).await.map_err(|source| {
            ProviderConnectionError::Transport {
                provider: name.to_string(),
                source,
            }
        })?;
        self.stats.opened.fetch_add(1, Ordering::SeqCst);

        if let Err(source) = transport.request("initialize", Some(initialize_params())).await {
            self.close_transport(name, transport.as_mut()).await;
            return Err(ProviderConnectionError::Handshake {
                provider: name.to_string(),
                source,
            });
        }
        if let Err(e) = transport.notify("notifications/initialized", None).await {
            tracing::debug!(provider = %name, error = %e, "initialized notification failed");
        }

        let tools = match list_tools(transport.as_ref()).await {
            Ok(tools) => tools,
            Err(source) => {
                self.close_transport(name, transport.as_mut()).await;
                return Err(ProviderConnectionError::Listing {
                    provider: name.to_string(),
                    source,
                });
            }
        };

        tracing::info!(
            provider = %name,
            transport = %transport.kind(),
            tools = tools.len(),
            "Provider connected"
        );

        Ok(ProviderConnection {
            name: name.to_string(),
            kind: transport.kind(),
            transport,
            tools,
        })
    }

    /// Attempt every provider concurrently. Failures are collected, never
    /// short-circuit, and successes keep the order of `names`.
    pub async fn connect_many(&self, names: &[String]) -> BatchConnect {
        let attempts = join_all(names.iter().map(|name| self.connect(name))).await;

        let mut batch = BatchConnect::default();
        for attempt in attempts {
            match attempt {
                Ok(connection) => batch.connections.push(connection),
                Err(e) => {
                    tracing::warn!(provider = %e.provider(), error = %e, "Provider connection failed");
                    batch.failures.push(e);
                }
            }
        }
        batch
    }

    /// Route a namespaced `provider__tool` call to the matching connection.
    pub async fn execute(
        connections: &[ProviderConnection],
        namespaced_name: &str,
        input: serde_json::Value,
    ) -> ToolOutput {
        let Some((provider, tool)) = split_namespaced(namespaced_name) else {
            return ToolOutput::error(format!("Malformed tool name: {namespaced_name}"));
        };
        let Some(connection) = connections.iter().find(|c| c.name == provider) else {
            return ToolOutput::error(format!(
                "Unknown provider `{provider}` for tool {namespaced_name}"
            ));
        };
        connection.call_tool(tool, input).await
    }

    /// Close one connection. Errors are logged and swallowed.
    pub async fn close(&self, mut connection: ProviderConnection) {
        let name = connection.name.clone();
        self.close_transport(&name, connection.transport.as_mut()).await;
    }

    /// Close every connection concurrently. One failing close never stops
    /// the others.
    pub async fn close_all(&self, connections: Vec<ProviderConnection>) {
        join_all(connections.into_iter().map(|c| self.close(c))).await;
    }

    async fn close_transport(&self, name: &str, transport: &mut dyn Transport) {
        if let Err(e) = transport.close().await {
            tracing::warn!(provider = %name, error = %e, "Error while closing provider");
        }
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

async fn list_tools(transport: &dyn Transport) -> Result<Vec<ProviderTool>, crate::error::TransportError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_LIST_PAGES {
        let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
        let result = transport.request("tools/list", params).await?;
        let page: ToolsPage = serde_json::from_value(result)
            .map_err(|e| crate::error::TransportError::Protocol(format!("bad tools/list result: {e}")))?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(tools)
}
