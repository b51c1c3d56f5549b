use super::schema::{AppConfig, DebugConfig, PartialConfig};
use crate::specialist::SpecialistDefinition;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_LISTENER_ADDR: &str = "127.0.0.1:4417";
pub const DEFAULT_MAX_PAYLOAD_CHARS: usize = 2000;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence. Keyed collections (tiers,
    /// providers, specialists by name) merge per key, self winning.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        let mut model_tiers = fallback.model_tiers;
        model_tiers.extend(self.model_tiers);

        let mut providers = fallback.providers;
        providers.extend(self.providers);

        PartialConfig {
            model: self.model.or(fallback.model),
            model_tiers,
            orchestrator_max_turns: self.orchestrator_max_turns.or(fallback.orchestrator_max_turns),
            specialist_max_turns: self.specialist_max_turns.or(fallback.specialist_max_turns),
            specialist_timeout_secs: self
                .specialist_timeout_secs
                .or(fallback.specialist_timeout_secs),
            specialists: merge_specialists(self.specialists, fallback.specialists),
            providers,
            debug_enabled: self.debug_enabled.or(fallback.debug_enabled),
            debug_listener_addr: self.debug_listener_addr.or(fallback.debug_listener_addr),
            debug_source: self.debug_source.or(fallback.debug_source),
            debug_push_cooldown_secs: self
                .debug_push_cooldown_secs
                .or(fallback.debug_push_cooldown_secs),
            debug_max_payload_chars: self
                .debug_max_payload_chars
                .or(fallback.debug_max_payload_chars),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let providers = self
            .providers
            .into_iter()
            .map(|(name, spec)| {
                let config = spec.into_config(&name);
                (name, config)
            })
            .collect();

        AppConfig {
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            model_tiers: self.model_tiers,
            orchestrator_max_turns: self.orchestrator_max_turns.unwrap_or(12),
            specialist_max_turns: self.specialist_max_turns.unwrap_or(10),
            specialist_timeout_secs: self.specialist_timeout_secs.unwrap_or(300),
            specialists: self.specialists,
            providers,
            debug: DebugConfig {
                enabled: self.debug_enabled.unwrap_or(true),
                listener_addr: self
                    .debug_listener_addr
                    .unwrap_or_else(|| DEFAULT_LISTENER_ADDR.to_string()),
                source: self.debug_source.unwrap_or_else(|| "cli".to_string()),
                push_cooldown_secs: self.debug_push_cooldown_secs.unwrap_or(30),
                max_payload_chars: self
                    .debug_max_payload_chars
                    .unwrap_or(DEFAULT_MAX_PAYLOAD_CHARS),
            },
        }
    }
}

/// Higher-priority definitions replace lower ones with the same name; order
/// is fallback order followed by new names.
fn merge_specialists(
    primary: Vec<SpecialistDefinition>,
    fallback: Vec<SpecialistDefinition>,
) -> Vec<SpecialistDefinition> {
    let mut merged: Vec<SpecialistDefinition> = fallback
        .into_iter()
        .filter(|f| !primary.iter().any(|p| p.name == f.name))
        .collect();
    merged.extend(primary);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, description: &str) -> SpecialistDefinition {
        SpecialistDefinition {
            name: name.into(),
            description: description.into(),
            providers: vec![],
            model_tier: None,
            max_turns: None,
            tools: vec![],
            system_prompt: String::new(),
        }
    }

    #[test]
    fn primary_values_win() {
        let primary = PartialConfig {
            model: Some("fast-model".into()),
            ..Default::default()
        };
        let fallback = PartialConfig {
            model: Some("slow-model".into()),
            orchestrator_max_turns: Some(4),
            ..Default::default()
        };

        let config = primary.with_fallback(fallback).finalize();
        assert_eq!(config.model, "fast-model");
        assert_eq!(config.orchestrator_max_turns, 4);
    }

    #[test]
    fn defaults_fill_gaps() {
        let config = PartialConfig::default().finalize();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.specialist_max_turns, 10);
        assert!(config.debug.enabled);
        assert_eq!(config.debug.listener_addr, DEFAULT_LISTENER_ADDR);
        assert_eq!(config.debug.push_endpoint(), "http://127.0.0.1:4417/events");
    }

    #[test]
    fn specialists_merge_by_name() {
        let primary = PartialConfig {
            specialists: vec![def("email", "project email")],
            ..Default::default()
        };
        let fallback = PartialConfig {
            specialists: vec![def("email", "global email"), def("calendar", "global cal")],
            ..Default::default()
        };

        let merged = primary.with_fallback(fallback).finalize().specialists;
        assert_eq!(merged.len(), 2);
        let email = merged.iter().find(|d| d.name == "email").unwrap();
        assert_eq!(email.description, "project email");
    }

    #[test]
    fn tiers_merge_per_key() {
        let mut primary = PartialConfig::default();
        primary.model_tiers.insert("fast".into(), "haiku".into());
        let mut fallback = PartialConfig::default();
        fallback.model_tiers.insert("fast".into(), "old-fast".into());
        fallback.model_tiers.insert("deep".into(), "opus".into());

        let config = primary.with_fallback(fallback).finalize();
        assert_eq!(config.model_tiers["fast"], "haiku");
        assert_eq!(config.model_tiers["deep"], "opus");
    }
}
