use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Duplicate specialist definition `{name}`")]
    DuplicateSpecialist { name: String },

    #[error("Specialist `{specialist}` requires unknown provider `{provider}`")]
    UnknownProvider { specialist: String, provider: String },

    #[error("Provider name `{provider}` must not contain `__` or end in `_`")]
    InvalidProviderName { provider: String },
}

/// Failure talking to the language model. Propagates out of the turn loop and
/// is classified at the spawner or orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Request(String),

    #[error("Model stream failed: {0}")]
    Stream(String),

    #[error("Model returned an empty response")]
    EmptyResponse,
}

/// Low-level failures on a single tool-provider channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request `{method}` timed out after {timeout_secs}s")]
    Timeout { method: String, timeout_secs: u64 },

    #[error("Channel closed")]
    Closed,
}

/// Why a provider could not be brought to a usable state. Every variant is
/// tagged with the provider name so batch results stay attributable.
#[derive(Debug, thiserror::Error)]
pub enum ProviderConnectionError {
    #[error("Provider `{provider}` is not configured")]
    Unconfigured { provider: String },

    #[error("Provider `{provider}` transport failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("Provider `{provider}` handshake failed: {source}")]
    Handshake {
        provider: String,
        #[source]
        source: TransportError,
    },

    #[error("Provider `{provider}` tool listing failed: {source}")]
    Listing {
        provider: String,
        #[source]
        source: TransportError,
    },
}

impl ProviderConnectionError {
    /// Name of the provider this failure belongs to.
    pub fn provider(&self) -> &str {
        match self {
            Self::Unconfigured { provider }
            | Self::Transport { provider, .. }
            | Self::Handshake { provider, .. }
            | Self::Listing { provider, .. } => provider,
        }
    }
}

/// Reasons a specialist invocation ends unsuccessfully. Never escapes the
/// spawner: it is rendered into `SpawnResult::error`.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Unknown specialist: {name}")]
    UnknownSpecialist { name: String },

    #[error("No tool providers available for `{specialist}` ({failed} failed to connect)")]
    NoProvidersConnected { specialist: String, failed: usize },

    #[error("Specialist `{specialist}` timed out after {timeout_secs}s")]
    Timeout { specialist: String, timeout_secs: u64 },

    #[error(transparent)]
    Model(#[from] ModelError),
}
