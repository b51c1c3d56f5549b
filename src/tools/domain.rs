//! Domain tools: in-process tools backed by external collaborators such as
//! a document database. Specialists opt into them by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::ToolOutput;
use crate::model::ToolSpec;

#[async_trait]
pub trait DomainTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(&self, input: serde_json::Value) -> ToolOutput;
}

/// Domain tools by name.
#[derive(Clone, Default)]
pub struct DomainToolRegistry {
    tools: BTreeMap<String, Arc<dyn DomainTool>>,
}

impl DomainToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its spec name, replacing any previous one.
    pub fn register(&mut self, tool: Arc<dyn DomainTool>) {
        let name = tool.spec().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replaced domain tool registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DomainTool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
