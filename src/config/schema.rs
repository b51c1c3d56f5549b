use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::provider::{ProviderConfig, ProviderSpec};
use crate::specialist::SpecialistDefinition;

/// The TOML file structure for conductor.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub model: Option<ModelSection>,
    pub orchestrator: Option<OrchestratorSection>,
    pub specialists: Option<SpecialistsSection>,
    /// Inline `[[specialist]]` definitions.
    #[serde(default)]
    pub specialist: Vec<SpecialistDefinition>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSpec>,
    pub debug: Option<DebugSection>,
}

#[derive(Debug, Deserialize)]
pub struct ModelSection {
    pub default: Option<String>,
    /// Tier name (e.g. "fast") to model name.
    #[serde(default)]
    pub tiers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorSection {
    pub max_turns: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SpecialistsSection {
    pub default_max_turns: Option<u32>,
    pub timeout_secs: Option<u64>,
    /// Directory of `*.toml` files, each holding `[[specialist]]` tables.
    pub definitions_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DebugSection {
    pub enabled: Option<bool>,
    pub listener_addr: Option<String>,
    pub source: Option<String>,
    pub push_cooldown_secs: Option<u64>,
    pub max_payload_chars: Option<usize>,
}

/// Debug bus settings.
#[derive(Debug, Clone)]
pub struct DebugConfig {
    pub enabled: bool,
    /// `host:port` of the well-known listener.
    pub listener_addr: String,
    /// Process role stamped on every event this process emits.
    pub source: String,
    pub push_cooldown_secs: u64,
    pub max_payload_chars: usize,
}

impl DebugConfig {
    pub fn push_endpoint(&self) -> String {
        format!("http://{}/events", self.listener_addr)
    }
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub model_tiers: BTreeMap<String, String>,
    pub orchestrator_max_turns: u32,
    pub specialist_max_turns: u32,
    pub specialist_timeout_secs: u64,
    pub specialists: Vec<SpecialistDefinition>,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub debug: DebugConfig,
}

/// Partial config used during merge. All fields are Option (or keyed
/// collections) so that missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub model: Option<String>,
    pub model_tiers: BTreeMap<String, String>,
    pub orchestrator_max_turns: Option<u32>,
    pub specialist_max_turns: Option<u32>,
    pub specialist_timeout_secs: Option<u64>,
    pub specialists: Vec<SpecialistDefinition>,
    pub providers: BTreeMap<String, ProviderSpec>,
    pub debug_enabled: Option<bool>,
    pub debug_listener_addr: Option<String>,
    pub debug_source: Option<String>,
    pub debug_push_cooldown_secs: Option<u64>,
    pub debug_max_payload_chars: Option<usize>,
}

impl ConfigFile {
    /// Flatten the sectioned file into a `PartialConfig`. Definitions found in
    /// `definitions_dir` are appended after inline ones.
    pub fn into_partial(self, extra_specialists: Vec<SpecialistDefinition>) -> PartialConfig {
        let mut partial = PartialConfig::default();

        if let Some(model) = self.model {
            partial.model = model.default;
            partial.model_tiers = model.tiers;
        }
        if let Some(orch) = self.orchestrator {
            partial.orchestrator_max_turns = orch.max_turns;
        }
        if let Some(spec) = self.specialists {
            partial.specialist_max_turns = spec.default_max_turns;
            partial.specialist_timeout_secs = spec.timeout_secs;
        }
        if let Some(debug) = self.debug {
            partial.debug_enabled = debug.enabled;
            partial.debug_listener_addr = debug.listener_addr;
            partial.debug_source = debug.source;
            partial.debug_push_cooldown_secs = debug.push_cooldown_secs;
            partial.debug_max_payload_chars = debug.max_payload_chars;
        }

        partial.specialists = self.specialist;
        partial.specialists.extend(extra_specialists);
        partial.providers = self.providers;
        partial
    }

    /// Where this file wants extra specialist definitions loaded from,
    /// resolved against the file's own directory.
    pub fn definitions_dir(&self, file_dir: &std::path::Path) -> Option<PathBuf> {
        self.specialists
            .as_ref()
            .and_then(|s| s.definitions_dir.as_ref())
            .map(|dir| file_dir.join(dir))
    }
}
