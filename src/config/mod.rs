pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::provider::is_valid_provider_name;
use crate::specialist::SpecialistDefinition;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory and the global config dir.
pub const CONFIG_FILE_NAME: &str = "conductor.toml";

/// Load configuration by merging global, project, and CLI sources.
/// Precedence: CLI > project config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply). A file named
/// explicitly with `--config` must exist and parse.
pub fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    // Layer 1: Global config (~/.config/conductor/conductor.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Project config (--config path, or ./conductor.toml)
    let project = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => load_optional(Path::new(CONFIG_FILE_NAME)),
    };

    // Layer 3: CLI args
    let cli_partial = cli_to_partial(cli);

    Ok(cli_partial
        .with_fallback(project)
        .with_fallback(global)
        .finalize())
}

impl AppConfig {
    /// Resolve a specialist's model tier to a model name. Unknown or absent
    /// tiers fall back to the default model.
    pub fn model_for_tier(&self, tier: Option<&str>) -> &str {
        tier.and_then(|t| self.model_tiers.get(t))
            .map(String::as_str)
            .unwrap_or(&self.model)
    }

    /// Non-fatal problems worth reporting at start-up.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues: Vec<ConfigError> = self
            .providers
            .keys()
            .filter(|name| !is_valid_provider_name(name))
            .map(|name| ConfigError::InvalidProviderName {
                provider: name.clone(),
            })
            .collect();
        for def in &self.specialists {
            for provider in &def.providers {
                if !self.providers.contains_key(provider) {
                    issues.push(ConfigError::UnknownProvider {
                        specialist: def.name.clone(),
                        provider: provider.clone(),
                    });
                }
            }
        }
        issues
    }
}

/// Parse a config document. `path` is used for error messages and for
/// resolving `definitions_dir`.
pub fn parse_config(contents: &str, path: &Path) -> Result<PartialConfig, ConfigError> {
    let file: ConfigFile = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let extra = match file.definitions_dir(base) {
        Some(dir) => load_definitions_dir(&dir)?,
        None => Vec::new(),
    };
    Ok(file.into_partial(extra))
}

/// Load a file that must exist.
fn load_config_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let partial = parse_config(&contents, path)?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(partial)
}

/// Load a file that may be absent. Parse errors are logged and the layer is
/// skipped.
fn load_optional(path: &Path) -> PartialConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match parse_config(&contents, path) {
            Ok(partial) => {
                tracing::info!("Loaded config from {}", path.display());
                partial
            }
            Err(e) => {
                tracing::warn!("Config parse error: {}", e);
                PartialConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            PartialConfig::default()
        }
        Err(e) => {
            tracing::warn!("Failed to read config at {}: {}", path.display(), e);
            PartialConfig::default()
        }
    }
}

fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(p) => load_optional(&p),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Every `*.toml` in `dir`, in file-name order. Each file holds one or more
/// `[[specialist]]` tables.
fn load_definitions_dir(dir: &Path) -> Result<Vec<SpecialistDefinition>, ConfigError> {
    #[derive(serde::Deserialize)]
    struct DefinitionFile {
        #[serde(default)]
        specialist: Vec<SpecialistDefinition>,
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut defs = Vec::new();
    for path in paths {
        let contents = std::fs::read_to_string(&path)?;
        let file: DefinitionFile =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(
            path = %path.display(),
            count = file.specialist.len(),
            "Loaded specialist definitions"
        );
        defs.extend(file.specialist);
    }
    Ok(defs)
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/conductor/conductor.toml
/// macOS: ~/Library/Application Support/conductor/conductor.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "conductor")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    PartialConfig {
        model: cli.model.clone(),
        debug_enabled: cli.no_debug.then_some(false),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TransportConfig;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[model]
default = "base-model"
tiers = { fast = "small-model" }

[orchestrator]
max_turns = 6

[specialists]
default_max_turns = 4
timeout_secs = 90

[providers.calendar]
transport = "stdio"
command = "calendar-server"
args = ["--stdio"]
env = { TOKEN = "${CAL_TOKEN}" }

[providers.search]
transport = "sse"
url = "http://localhost:9000/sse"
headers = { Authorization = "Bearer x" }
request_timeout_secs = 5
auth = { kind = "api_key", credential = "SEARCH_KEY" }

[[specialist]]
name = "scheduler"
description = "Manages calendar events"
providers = ["calendar"]
model_tier = "fast"
tools = ["current_time"]
system_prompt = "You schedule things."

[debug]
enabled = false
source = "bot"
"#;

    #[test]
    fn parses_full_document() {
        let partial = parse_config(SAMPLE, Path::new("conductor.toml")).unwrap();
        let config = partial.finalize();

        assert_eq!(config.model, "base-model");
        assert_eq!(config.model_for_tier(Some("fast")), "small-model");
        assert_eq!(config.model_for_tier(Some("unknown")), "base-model");
        assert_eq!(config.model_for_tier(None), "base-model");
        assert_eq!(config.orchestrator_max_turns, 6);
        assert_eq!(config.specialist_timeout_secs, 90);
        assert!(!config.debug.enabled);
        assert_eq!(config.debug.source, "bot");

        let calendar = &config.providers["calendar"];
        assert_eq!(calendar.name, "calendar");
        assert!(matches!(calendar.transport, TransportConfig::Stdio { .. }));

        let search = &config.providers["search"];
        assert_eq!(search.request_timeout.as_secs(), 5);
        assert_eq!(search.auth.as_ref().unwrap().kind, "api_key");

        assert_eq!(config.specialists.len(), 1);
        assert_eq!(config.specialists[0].providers, vec!["calendar"]);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn validate_flags_unknown_provider_references() {
        let doc = r#"
[[specialist]]
name = "mailer"
description = "email"
providers = ["gmail"]
system_prompt = "x"
"#;
        let config = parse_config(doc, Path::new("c.toml")).unwrap().finalize();
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].to_string().contains("gmail"));
    }

    #[test]
    fn validate_flags_provider_names_that_break_namespacing() {
        let doc = r#"
[providers.google__drive]
transport = "stdio"
command = "drive-server"

[providers.my_]
transport = "stdio"
command = "my-server"

[providers.calendar]
transport = "stdio"
command = "calendar-server"
"#;
        let config = parse_config(doc, Path::new("c.toml")).unwrap().finalize();
        let issues: Vec<String> = config.validate().iter().map(|e| e.to_string()).collect();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.contains("`google__drive`")));
        assert!(issues.iter().any(|i| i.contains("`my_`")));
    }

    #[test]
    fn malformed_document_reports_path() {
        let err = parse_config("[model\n", Path::new("/tmp/broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn definitions_dir_is_loaded_relative_to_config() {
        let tmp = TempDir::new().unwrap();
        let defs = tmp.path().join("specialists");
        std::fs::create_dir(&defs).unwrap();
        std::fs::write(
            defs.join("b.toml"),
            "[[specialist]]\nname = \"notes\"\ndescription = \"n\"\nsystem_prompt = \"p\"\n",
        )
        .unwrap();
        std::fs::write(
            defs.join("a.toml"),
            "[[specialist]]\nname = \"email\"\ndescription = \"e\"\nsystem_prompt = \"p\"\n",
        )
        .unwrap();
        std::fs::write(defs.join("ignored.txt"), "not toml").unwrap();

        let config_path = tmp.path().join("conductor.toml");
        let doc = "[specialists]\ndefinitions_dir = \"specialists\"\n";
        let config = parse_config(doc, &config_path).unwrap().finalize();

        let names: Vec<_> = config.specialists.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["email", "notes"]);
    }

    #[test]
    fn missing_optional_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let partial = load_optional(&tmp.path().join("absent.toml"));
        assert!(partial.model.is_none());
        assert!(partial.providers.is_empty());
    }
}
