#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use conductor::config::{AppConfig, PartialConfig};
use conductor::context::RuntimeContext;
use conductor::debug::DebugBus;
use conductor::error::{ModelError, TransportError};
use conductor::model::{ContentBlock, ModelClient, ModelRequest, ModelResponse, TokenUsage};
use conductor::provider::{Connector, ProviderConfig, Transport, TransportKind};
use conductor::specialist::SpecialistDefinition;

// ─── Scripted model ───────────────────────────────────────────────────

pub fn text(text: &str) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse {
        content: vec![ContentBlock::Text { text: text.into() }],
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        },
    })
}

pub fn tool_calls(calls: &[(&str, &str, serde_json::Value)]) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse {
        content: calls
            .iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: input.clone(),
            })
            .collect(),
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        },
    })
}

pub fn model_error(message: &str) -> Result<ModelResponse, ModelError> {
    Err(ModelError::Request(message.into()))
}

/// What the model saw on one call.
#[derive(Clone, Debug)]
pub struct SeenRequest {
    pub model: String,
    pub system: String,
    pub messages: usize,
    pub tools: Vec<String>,
    pub last_user_text: String,
}

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<ModelResponse, ModelError>>,
    delay: Duration,
}

/// Model client that replays canned responses. Scripts are selected by the
/// longest system-prompt prefix registered; the empty prefix is the default.
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<Vec<(String, Script)>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<ModelResponse, ModelError>>) -> Self {
        let model = Self::default();
        model.script("", responses);
        model
    }

    pub fn script(&self, system_prefix: &str, responses: Vec<Result<ModelResponse, ModelError>>) {
        self.script_with_delay(system_prefix, responses, Duration::ZERO);
    }

    pub fn script_with_delay(
        &self,
        system_prefix: &str,
        responses: Vec<Result<ModelResponse, ModelError>>,
        delay: Duration,
    ) {
        self.scripts.lock().unwrap().push((
            system_prefix.to_string(),
            Script {
                responses: responses.into(),
                delay,
            },
        ));
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let last_user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == conductor::model::Role::User)
            .map(|m| m.text())
            .unwrap_or_default();
        self.seen.lock().unwrap().push(SeenRequest {
            model: request.model.to_string(),
            system: request.system.to_string(),
            messages: request.messages.len(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            last_user_text,
        });

        let (response, delay) = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts
                .iter_mut()
                .filter(|(prefix, _)| request.system.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, script)| script);
            match script {
                Some(script) => (
                    script
                        .responses
                        .pop_front()
                        .unwrap_or_else(|| Err(ModelError::EmptyResponse)),
                    script.delay,
                ),
                None => (Err(ModelError::EmptyResponse), Duration::ZERO),
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

// ─── Fake providers ───────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum FakeProvider {
    /// Connects and serves the named tools. Calls echo `provider:tool:input`.
    Healthy(Vec<&'static str>),
    /// `open` fails.
    Unreachable,
    /// Opens, then `initialize` fails.
    BadHandshake,
    /// Opens and initializes, then `tools/list` fails.
    BadListing,
    /// Healthy, but every `tools/call` fails.
    FailingCalls(Vec<&'static str>),
    /// Healthy, but `close` reports an error.
    FailingClose(Vec<&'static str>),
}

/// Shared record of what the fake transports did.
#[derive(Default)]
pub struct FakeLog {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub calls: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl FakeLog {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn tool_calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct FakeConnector {
    providers: HashMap<String, FakeProvider>,
    pub log: Arc<FakeLog>,
}

impl FakeConnector {
    pub fn new(providers: &[(&str, FakeProvider)]) -> Self {
        Self {
            providers: providers
                .iter()
                .map(|(name, p)| (name.to_string(), p.clone()))
                .collect(),
            log: Arc::new(FakeLog::default()),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, config: &ProviderConfig) -> Result<Box<dyn Transport>, TransportError> {
        let behavior = self
            .providers
            .get(&config.name)
            .cloned()
            .unwrap_or(FakeProvider::Unreachable);
        if matches!(behavior, FakeProvider::Unreachable) {
            return Err(TransportError::Spawn {
                command: config.name.clone(),
                message: "No such file or directory".into(),
            });
        }
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTransport {
            provider: config.name.clone(),
            behavior,
            log: self.log.clone(),
            closed: false,
        }))
    }
}

struct FakeTransport {
    provider: String,
    behavior: FakeProvider,
    log: Arc<FakeLog>,
    closed: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        match (method, &self.behavior) {
            ("initialize", FakeProvider::BadHandshake) => Err(TransportError::Rpc {
                code: -32603,
                message: "handshake refused".into(),
            }),
            ("initialize", _) => Ok(json!({ "protocolVersion": "2024-11-05" })),
            ("tools/list", FakeProvider::BadListing) => Err(TransportError::Closed),
            (
                "tools/list",
                FakeProvider::Healthy(tools)
                | FakeProvider::FailingCalls(tools)
                | FakeProvider::FailingClose(tools),
            ) => {
                let tools: Vec<_> = tools
                    .iter()
                    .map(|name| json!({ "name": name, "description": format!("{name} tool") }))
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            ("tools/call", behavior) => {
                let params = params.unwrap_or_default();
                let tool = params["name"].as_str().unwrap_or_default().to_string();
                let input = params["arguments"].clone();
                self.log
                    .calls
                    .lock()
                    .unwrap()
                    .push((self.provider.clone(), tool.clone(), input.clone()));
                if matches!(behavior, FakeProvider::FailingCalls(_)) {
                    return Err(TransportError::Timeout {
                        method: "tools/call".into(),
                        timeout_secs: 30,
                    });
                }
                Ok(json!({
                    "content": [{ "type": "text", "text": format!("{}:{}:{}", self.provider, tool, input) }]
                }))
            }
            (other, _) => Err(TransportError::Rpc {
                code: -32601,
                message: format!("unknown method {other}"),
            }),
        }
    }

    async fn notify(
        &self,
        _method: &str,
        _params: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.log.closed.fetch_add(1, Ordering::SeqCst);
            if matches!(self.behavior, FakeProvider::FailingClose(_)) {
                return Err(TransportError::Closed);
            }
        }
        Ok(())
    }
}

// ─── Real subprocess provider ─────────────────────────────────────────

/// A minimal stdio tool server in POSIX sh. Answers `initialize`,
/// `tools/list` (one `echo` tool) and `tools/call`.
pub const SH_PROVIDER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\),.*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"sh","version":"0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo back","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echoed by sh"}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"unknown method"}}\n' "$id" ;;
  esac
done
"#;

pub fn sh_provider(name: &str) -> ProviderConfig {
    ProviderConfig::stdio(name, "sh", &["-c", SH_PROVIDER])
}

// ─── Context helpers ──────────────────────────────────────────────────

pub fn specialist(name: &str, providers: &[&str]) -> SpecialistDefinition {
    SpecialistDefinition {
        name: name.into(),
        description: format!("Handles {name}"),
        providers: providers.iter().map(|p| p.to_string()).collect(),
        model_tier: None,
        max_turns: None,
        tools: vec![],
        system_prompt: format!("You are the {name} specialist."),
    }
}

pub fn test_config(specialists: Vec<SpecialistDefinition>, providers: &[&str]) -> AppConfig {
    let mut config = PartialConfig::default().finalize();
    config.model = "test-model".into();
    config.specialists = specialists;
    config.providers = providers
        .iter()
        .map(|name| (name.to_string(), ProviderConfig::stdio(name, "unused", &[])))
        .collect::<BTreeMap<_, _>>();
    config
}

pub struct Harness {
    pub ctx: Arc<RuntimeContext>,
    pub model: Arc<ScriptedModel>,
    pub log: Arc<FakeLog>,
    pub bus: Arc<DebugBus>,
}

pub fn harness(
    config: AppConfig,
    model: ScriptedModel,
    providers: &[(&str, FakeProvider)],
) -> Harness {
    let connector = FakeConnector::new(providers);
    let log = connector.log.clone();
    let model = Arc::new(model);
    let bus = Arc::new(DebugBus::direct("test", 500));
    let ctx = RuntimeContext::new(config, model.clone(), Arc::new(connector), bus.clone()).unwrap();
    Harness {
        ctx: Arc::new(ctx),
        model,
        log,
        bus,
    }
}

/// Drain everything currently buffered on a debug subscription.
pub fn drain(
    rx: &mut tokio::sync::broadcast::Receiver<conductor::debug::DebugEvent>,
) -> Vec<conductor::debug::DebugEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
