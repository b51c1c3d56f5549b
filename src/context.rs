use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::debug::DebugBus;
use crate::error::ConfigError;
use crate::model::{GenaiModel, ModelClient};
use crate::provider::{ConnectionManager, Connector, DefaultConnector};
use crate::specialist::SpecialistRegistry;
use crate::tools::DomainToolRegistry;

/// Everything the orchestrator and spawner share. Built once at start-up and
/// passed around by `Arc`.
pub struct RuntimeContext {
    pub config: AppConfig,
    pub model: Arc<dyn ModelClient>,
    pub specialists: SpecialistRegistry,
    pub connections: ConnectionManager,
    pub domain_tools: DomainToolRegistry,
    pub debug: Arc<DebugBus>,
}

impl RuntimeContext {
    pub fn new(
        config: AppConfig,
        model: Arc<dyn ModelClient>,
        connector: Arc<dyn Connector>,
        debug: Arc<DebugBus>,
    ) -> Result<Self, ConfigError> {
        let specialists = SpecialistRegistry::new(config.specialists.clone())?;
        let connections = ConnectionManager::new(config.providers.clone(), connector);
        Ok(Self {
            config,
            model,
            specialists,
            connections,
            domain_tools: DomainToolRegistry::new(),
            debug,
        })
    }

    /// Production wiring: genai model client, real transports, and a push
    /// bus aimed at the configured listener.
    pub fn from_config(config: AppConfig) -> Result<Self, ConfigError> {
        let debug = Arc::new(DebugBus::from_config(&config.debug));
        Self::new(
            config,
            Arc::new(GenaiModel::new()),
            Arc::new(DefaultConnector::new()),
            debug,
        )
    }

    pub fn with_domain_tools(mut self, domain_tools: DomainToolRegistry) -> Self {
        self.domain_tools = domain_tools;
        self
    }

    pub fn specialist_timeout(&self) -> Duration {
        Duration::from_secs(self.config.specialist_timeout_secs)
    }
}
