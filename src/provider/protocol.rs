//! JSON-RPC 2.0 message types spoken with tool providers.

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::tools::ToolOutput;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a serde_json::Value>,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<&'a serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// A request with no id; the server sends nothing back.
#[derive(Debug, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a serde_json::Value>,
}

impl<'a> RpcNotification<'a> {
    pub fn new(method: &'a str, params: Option<&'a serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Any inbound message. Server-initiated requests and notifications carry a
/// `method` and are ignored by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    /// Numeric id of a response to one of our requests.
    pub fn response_id(&self) -> Option<u64> {
        if self.method.is_some() {
            return None;
        }
        match self.id.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<serde_json::Value, TransportError> {
        if let Some(error) = self.error {
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

/// A tool advertised by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

/// One page of a `tools/list` result.
#[derive(Debug, Deserialize)]
pub struct ToolsPage {
    #[serde(default)]
    pub tools: Vec<ProviderTool>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

pub fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "conductor",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Flatten a `tools/call` result into a tool output. Text blocks are joined;
/// other block kinds are described by type.
pub fn parse_call_result(result: serde_json::Value) -> ToolOutput {
    let is_error = result
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let content = match result.get("content").and_then(|c| c.as_array()) {
        Some(blocks) => blocks
            .iter()
            .map(|block| match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => block
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                Some(other) => format!("[{other} content]"),
                None => block.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    };

    ToolOutput { content, is_error }
}
