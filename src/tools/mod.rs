//! Tool plumbing shared by every turn loop.
//!
//! Tool errors are always returned as flagged [`ToolOutput`]s (never panics
//! or `Err` variants) so the model can observe the error and react.

pub mod domain;
pub mod local;

use async_trait::async_trait;
use serde::Serialize;

use crate::model::ToolSpec;

pub use domain::{DomainTool, DomainToolRegistry};
pub use local::LocalTool;

/// Textual result of one tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    /// Serialize `value` as the tool's content.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(content) => Self::ok(content),
            Err(e) => Self::error(format!("Failed to serialize tool result: {e}")),
        }
    }
}

/// A tool set a turn loop can advertise and call into.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    /// Schemas advertised to the model.
    fn specs(&self) -> Vec<ToolSpec>;

    /// Execute one call. Unknown names produce a flagged output.
    async fn dispatch(&self, name: &str, input: serde_json::Value) -> ToolOutput;
}
