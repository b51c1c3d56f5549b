use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A domain specialist as declared in config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistDefinition {
    pub name: String,
    pub description: String,
    /// Tool providers connected for each invocation.
    #[serde(default)]
    pub providers: Vec<String>,
    /// Key into `[model.tiers]`; the default model when absent.
    #[serde(default)]
    pub model_tier: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Extra local or domain tools by name.
    #[serde(default)]
    pub tools: Vec<String>,
    pub system_prompt: String,
}

/// Summary row returned to the orchestrator's discovery tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialistSummary {
    pub name: String,
    pub description: String,
    pub providers: Vec<String>,
}

/// Immutable lookup table of specialist definitions, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SpecialistRegistry {
    definitions: Vec<SpecialistDefinition>,
    index: BTreeMap<String, usize>,
}

impl SpecialistRegistry {
    pub fn new(definitions: Vec<SpecialistDefinition>) -> Result<Self, ConfigError> {
        let mut index = BTreeMap::new();
        for (i, def) in definitions.iter().enumerate() {
            if index.insert(def.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateSpecialist {
                    name: def.name.clone(),
                });
            }
        }
        Ok(Self { definitions, index })
    }

    pub fn get(&self, name: &str) -> Option<&SpecialistDefinition> {
        self.index.get(name).map(|&i| &self.definitions[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpecialistDefinition> {
        self.definitions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn summaries(&self) -> Vec<SpecialistSummary> {
        self.definitions
            .iter()
            .map(|d| SpecialistSummary {
                name: d.name.clone(),
                description: d.description.clone(),
                providers: d.providers.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
