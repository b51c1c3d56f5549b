//! Tool-provider connections.
//!
//! A tool provider is an external tool server reachable over a declared
//! transport: a local subprocess speaking newline-framed JSON-RPC on its
//! standard streams, or a remote server-sent-events stream. The
//! [`manager::ConnectionManager`] turns a [`ProviderConfig`] into a live
//! [`manager::ProviderConnection`]; the [`guard::ConnectionSet`] owns the
//! connections of one spawn invocation and guarantees their teardown.

pub mod guard;
pub mod manager;
pub mod protocol;
pub mod sse;
pub mod stdio;
pub mod transport;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use guard::ConnectionSet;
pub use manager::{BatchConnect, ConnectionManager, ConnectionStats, ProviderConnection};
pub use protocol::ProviderTool;
pub use transport::{Connector, DefaultConnector, Transport};

/// Separates provider and tool in a namespaced tool name: `calendar__list_events`.
///
/// Model APIs restrict tool names to `[a-zA-Z0-9_-]`, so the separator is
/// built from those characters. Provider names must not contain it.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Default per-request timeout on a provider channel.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn namespaced(provider: &str, tool: &str) -> String {
    format!("{provider}{NAMESPACE_SEPARATOR}{tool}")
}

/// Whether `name` can be a provider key. Names containing the separator, or
/// ending in `_` so that the separator would overlap the tool name, cannot
/// be split back out of a namespaced tool name.
pub fn is_valid_provider_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(NAMESPACE_SEPARATOR) && !name.ends_with('_')
}

/// Split `provider__tool` at the first separator. Both halves must be non-empty.
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    let (provider, tool) = name.split_once(NAMESPACE_SEPARATOR)?;
    if provider.is_empty() || tool.is_empty() {
        return None;
    }
    Some((provider, tool))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Sse => f.write_str("sse"),
        }
    }
}

/// How to reach a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn a process and talk over its stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Values of the form `${VAR}` expand from the process environment.
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Open a persistent event stream at `url`.
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
        }
    }
}

/// Credential description shown by status commands. Never used for live calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthMetadata {
    pub kind: String,
    /// Environment variable the credential store populates.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AuthMetadata {
    /// Whether the named credential is present in the environment.
    pub fn credential_present(&self) -> bool {
        self.credential
            .as_deref()
            .is_some_and(|var| std::env::var_os(var).is_some())
    }
}

/// A `[providers.<name>]` table as written in config.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSpec {
    #[serde(flatten)]
    pub transport: TransportConfig,
    pub request_timeout_secs: Option<u64>,
    pub auth: Option<AuthMetadata>,
}

impl ProviderSpec {
    pub fn into_config(self, name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            transport: self.transport,
            request_timeout: self
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            auth: self.auth,
        }
    }
}

/// Resolved provider configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub transport: TransportConfig,
    pub request_timeout: Duration,
    pub auth: Option<AuthMetadata>,
}

impl ProviderConfig {
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportConfig::Stdio {
                command: command.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                env: BTreeMap::new(),
            },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth: None,
        }
    }

    pub fn sse(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportConfig::Sse {
                url: url.to_string(),
                headers: BTreeMap::new(),
            },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth: None,
        }
    }
}

/// Expand a `${VAR}` reference. Anything else passes through unchanged; an
/// unset variable expands to the empty string.
pub fn expand_env_value(key: &str, value: &str) -> String {
    match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).unwrap_or_else(|_| {
            tracing::warn!(
                var = %var_name,
                key = %key,
                "Environment variable not found, using empty string"
            );
            String::new()
        }),
        None => value.to_string(),
    }
}
