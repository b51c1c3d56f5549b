//! The top-level orchestrator.
//!
//! Owns one long-lived conversation and runs the turn loop against a fixed
//! tool set: capability discovery plus specialist spawning. `chat` takes
//! `&mut self`, so calls on one instance are serialized by the borrow
//! checker; share an orchestrator across tasks behind a
//! `tokio::sync::Mutex`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::turn_loop::{TurnLoop, TurnTally};
use crate::context::RuntimeContext;
use crate::debug::{Category, EventType, TraceScope};
use crate::model::{Conversation, Message, TokenUsage, ToolSpec};
use crate::redact::redact_credentials;
use crate::specialist::{SpawnRequest, Spawner};
use crate::tools::{ToolDispatch, ToolOutput};

pub const LIST_SPECIALISTS: &str = "list_specialists";
pub const SPAWN_SPECIALIST: &str = "spawn_specialist";
pub const SPAWN_PARALLEL: &str = "spawn_parallel";

/// Returned to the user when a `chat` turn fails. The cause is only reported
/// on the debug bus and in the log.
pub const CHAT_FAILED_MESSAGE: &str =
    "Sorry, I couldn't complete that request. Please try again in a moment.";

pub struct Orchestrator {
    ctx: Arc<RuntimeContext>,
    spawner: Spawner,
    system: String,
    conversation: Conversation,
    usage: TokenUsage,
}

impl Orchestrator {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        let system = build_system_prompt(&ctx);
        Self {
            spawner: Spawner::new(ctx.clone()),
            ctx,
            system,
            conversation: Conversation::new(),
            usage: TokenUsage::default(),
        }
    }

    /// Run one user message to a final answer. Always returns readable text;
    /// a failed model call leaves the conversation as it was before the call.
    pub async fn chat(&mut self, message: &str) -> String {
        let request_id = Uuid::new_v4().to_string();
        let scope = TraceScope::new(
            self.ctx.debug.clone(),
            Category::Orchestrator,
            request_id.clone(),
            None,
        );
        scope.emit(
            EventType::Request,
            "chat",
            json!({
                "message": scope.truncate(message),
                "historyLength": self.conversation.len(),
            }),
        );
        tracing::info!(request_id = %request_id, "Orchestrator turn started");

        let checkpoint = self.conversation.len();
        self.conversation.push(Message::user(message));

        let tools = OrchestratorTools {
            ctx: &self.ctx,
            spawner: &self.spawner,
            request_id: &request_id,
        };
        let mut tally = TurnTally::default();
        let result = TurnLoop::new(
            self.ctx.model.as_ref(),
            &self.ctx.config.model,
            &self.system,
            &tools,
            self.ctx.config.orchestrator_max_turns,
        )
        .with_trace(&scope)
        .run(&mut self.conversation, &mut tally)
        .await;
        self.usage.add(tally.usage);

        match result {
            Ok(outcome) => {
                scope.emit(
                    EventType::Response,
                    "chat",
                    json!({
                        "text": scope.truncate(outcome.text()),
                        "modelCalls": tally.model_calls,
                        "tokensUsed": tally.usage,
                        "toolsUsed": tally.tools_used,
                    }),
                );
                outcome.into_text()
            }
            Err(e) => {
                self.conversation.truncate(checkpoint);
                let detail = redact_credentials(&e.to_string());
                tracing::error!(request_id = %request_id, error = %detail, "Orchestrator turn failed");
                scope.emit(
                    EventType::Error,
                    "chat",
                    json!({ "error": scope.truncate(&detail) }),
                );
                CHAT_FAILED_MESSAGE.to_string()
            }
        }
    }

    /// Forget the conversation. Session token totals are kept.
    pub fn clear(&mut self) {
        self.conversation.clear();
        tracing::debug!("Orchestrator conversation cleared");
    }

    pub fn history(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// Tokens used across every `chat` call on this instance, nested spawns
    /// excluded.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn spawner(&self) -> &Spawner {
        &self.spawner
    }
}

fn build_system_prompt(ctx: &RuntimeContext) -> String {
    let specialists = if ctx.specialists.is_empty() {
        "(none configured)".to_string()
    } else {
        ctx.specialists
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "\
You are a personal assistant that coordinates domain specialists.

## Specialists
{specialists}

## How to work
- Answer directly when no specialist is needed.
- Use `{SPAWN_SPECIALIST}` to delegate one task; give the specialist everything it needs in `task` and `context`, it cannot see this conversation.
- Use `{SPAWN_PARALLEL}` for independent tasks that can run at the same time.
- Use `{LIST_SPECIALISTS}` if you are unsure what a specialist can do.
- Specialist results are JSON. Summarize them for the user; report failures plainly.
"
    )
}

/// Schema for a specialist-name argument. An empty `enum` is rejected by
/// some model APIs, so it is left out when nothing is configured.
fn specialist_property(names: &[&str], description: &str) -> serde_json::Value {
    let mut property = json!({
        "type": "string",
        "description": description,
    });
    if !names.is_empty() {
        property["enum"] = json!(names);
    }
    property
}

/// The orchestrator's fixed tool set, bound to one `chat` request id so
/// spawned specialists record it as their parent.
struct OrchestratorTools<'a> {
    ctx: &'a RuntimeContext,
    spawner: &'a Spawner,
    request_id: &'a str,
}

#[derive(Deserialize)]
struct ParallelInput {
    tasks: Vec<SpawnRequest>,
}

#[async_trait]
impl ToolDispatch for OrchestratorTools<'_> {
    fn specs(&self) -> Vec<ToolSpec> {
        let names: Vec<&str> = self.ctx.specialists.names();
        vec![
            ToolSpec {
                name: LIST_SPECIALISTS.into(),
                description: "List the available specialists with their descriptions and tool providers."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            ToolSpec {
                name: SPAWN_SPECIALIST.into(),
                description: "Delegate a task to one specialist and wait for its result.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "specialist": specialist_property(&names, "Specialist name"),
                        "task": {
                            "type": "string",
                            "description": "What the specialist should do"
                        },
                        "context": {
                            "type": "string",
                            "description": "Background the specialist needs (optional)"
                        }
                    },
                    "required": ["specialist", "task"]
                }),
            },
            ToolSpec {
                name: SPAWN_PARALLEL.into(),
                description: "Delegate several independent tasks at once. Results come back in the same order."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "tasks": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "specialist": specialist_property(&names, "Specialist name"),
                                    "task": { "type": "string" },
                                    "context": { "type": "string" }
                                },
                                "required": ["specialist", "task"]
                            }
                        }
                    },
                    "required": ["tasks"]
                }),
            },
        ]
    }

    async fn dispatch(&self, name: &str, input: serde_json::Value) -> ToolOutput {
        match name {
            LIST_SPECIALISTS => ToolOutput::json(&self.ctx.specialists.summaries()),
            SPAWN_SPECIALIST => {
                let request: SpawnRequest = match serde_json::from_value(input) {
                    Ok(r) => r,
                    Err(e) => return ToolOutput::error(format!("{SPAWN_SPECIALIST}: invalid input: {e}")),
                };
                let result = self.spawner.spawn(request.with_parent(self.request_id)).await;
                let mut output = ToolOutput::json(&result);
                output.is_error = !result.success;
                output
            }
            SPAWN_PARALLEL => {
                let input: ParallelInput = match serde_json::from_value(input) {
                    Ok(i) => i,
                    Err(e) => return ToolOutput::error(format!("{SPAWN_PARALLEL}: invalid input: {e}")),
                };
                if input.tasks.is_empty() {
                    return ToolOutput::error(format!("{SPAWN_PARALLEL}: no tasks given"));
                }
                let results = self
                    .spawner
                    .spawn_parallel(input.tasks, Some(self.request_id))
                    .await;
                ToolOutput::json(&results)
            }
            unknown => ToolOutput::error(format!("Unknown tool: {unknown}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialist_enum_lists_names() {
        let property = specialist_property(&["email", "calendar"], "Specialist name");
        assert_eq!(property["enum"], json!(["email", "calendar"]));
        assert_eq!(property["type"], "string");
    }

    #[test]
    fn empty_registry_omits_enum() {
        let property = specialist_property(&[], "Specialist name");
        assert!(property.get("enum").is_none());
        assert_eq!(property["description"], "Specialist name");
    }
}
