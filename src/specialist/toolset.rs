//! Tool set assembled for one specialist invocation.
//!
//! Routing is decided once, when the set is built: each advertised name maps
//! to a [`Route`]. A name claimed by more than one source resolves local
//! first, then domain, then provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::ToolSpec;
use crate::provider::{ProviderConnection, namespaced};
use crate::tools::{DomainTool, DomainToolRegistry, LocalTool, ToolDispatch, ToolOutput};

#[derive(Clone)]
pub enum Route {
    Local(LocalTool),
    Domain(Arc<dyn DomainTool>),
    /// Index into the invocation's connections and the provider's own tool
    /// name, fixed at build time so the advertised name is never re-parsed.
    Provider { connection: usize, tool: String },
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Local(tool) => f.debug_tuple("Local").field(tool).finish(),
            Route::Domain(_) => f.write_str("Domain"),
            Route::Provider { connection, tool } => f
                .debug_struct("Provider")
                .field("connection", connection)
                .field("tool", tool)
                .finish(),
        }
    }
}

pub struct SpecialistToolSet<'a> {
    connections: &'a [ProviderConnection],
    routes: HashMap<String, Route>,
    specs: Vec<ToolSpec>,
}

impl<'a> SpecialistToolSet<'a> {
    /// `requested` names extra tools from the definition. Local utility tools
    /// are always present; requested names pull in domain tools.
    pub fn build(
        connections: &'a [ProviderConnection],
        domain: &DomainToolRegistry,
        requested: &[String],
    ) -> Self {
        let mut set = Self {
            connections,
            routes: HashMap::new(),
            specs: Vec::new(),
        };

        for tool in LocalTool::ALL {
            set.insert(tool.spec(), Route::Local(tool));
        }

        for name in requested {
            if LocalTool::from_name(name).is_some() {
                continue;
            }
            match domain.get(name) {
                Some(tool) => set.insert(tool.spec(), Route::Domain(tool.clone())),
                None => tracing::warn!(tool = %name, "Requested tool is not registered"),
            }
        }

        for (index, connection) in connections.iter().enumerate() {
            for tool in connection.tools() {
                let spec = ToolSpec {
                    name: namespaced(connection.name(), &tool.name),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                };
                set.insert(
                    spec,
                    Route::Provider {
                        connection: index,
                        tool: tool.name.clone(),
                    },
                );
            }
        }

        set
    }

    /// First claim wins; insertion order is the precedence order.
    fn insert(&mut self, spec: ToolSpec, route: Route) {
        if let Some(existing) = self.routes.get(&spec.name) {
            tracing::debug!(tool = %spec.name, kept = ?existing, "Shadowed tool name");
            return;
        }
        self.routes.insert(spec.name.clone(), route);
        self.specs.push(spec);
    }

    pub fn route(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }
}

#[async_trait]
impl ToolDispatch for SpecialistToolSet<'_> {
    fn specs(&self) -> Vec<ToolSpec> {
        self.specs.clone()
    }

    async fn dispatch(&self, name: &str, input: serde_json::Value) -> ToolOutput {
        match self.routes.get(name) {
            Some(Route::Local(tool)) => tool.execute(&input),
            Some(Route::Domain(tool)) => tool.call(input).await,
            Some(Route::Provider { connection, tool }) => match self.connections.get(*connection) {
                Some(connection) => connection.call_tool(tool, input).await,
                None => ToolOutput::error(format!("Unknown tool: {name}")),
            },
            None => ToolOutput::error(format!("Unknown tool: {name}")),
        }
    }
}
