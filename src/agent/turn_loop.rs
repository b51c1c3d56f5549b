//! The turn-based tool-calling loop shared by the orchestrator and every
//! specialist invocation.
//!
//! One turn is one model call. A response without tool-use blocks ends the
//! loop with its text. Otherwise every requested tool runs sequentially in
//! the order received, all outputs go back as a single tool-results message,
//! and the loop calls the model again. After `max_turns` model calls without
//! a final answer the loop stops with [`TurnOutcome::BudgetExhausted`].

use serde_json::json;

use crate::debug::{Category, EventType, TraceScope};
use crate::error::ModelError;
use crate::model::{ContentBlock, Conversation, Message, ModelClient, ModelRequest, Role, TokenUsage};
use crate::tools::ToolDispatch;

/// Final text recorded when the turn budget runs out.
pub const BUDGET_EXHAUSTED_MESSAGE: &str =
    "I ran out of steps before finishing this task. Try narrowing the request or allowing more turns.";

/// How a loop run ended. Both variants are normal terminal states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed(String),
    BudgetExhausted,
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Completed(text) => text,
            TurnOutcome::BudgetExhausted => BUDGET_EXHAUSTED_MESSAGE,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            TurnOutcome::Completed(text) => text,
            TurnOutcome::BudgetExhausted => BUDGET_EXHAUSTED_MESSAGE.to_string(),
        }
    }
}

/// Running totals for one loop run. Owned by the caller so the counts survive
/// a model error or a timeout that drops the loop future.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnTally {
    pub usage: TokenUsage,
    pub model_calls: u32,
    /// Distinct tool names in first-use order.
    pub tools_used: Vec<String>,
}

impl TurnTally {
    fn record_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }
}

pub struct TurnLoop<'a> {
    model: &'a dyn ModelClient,
    model_name: &'a str,
    system: &'a str,
    tools: &'a dyn ToolDispatch,
    max_turns: u32,
    trace: Option<&'a TraceScope>,
}

impl<'a> TurnLoop<'a> {
    pub fn new(
        model: &'a dyn ModelClient,
        model_name: &'a str,
        system: &'a str,
        tools: &'a dyn ToolDispatch,
        max_turns: u32,
    ) -> Self {
        Self {
            model,
            model_name,
            system,
            tools,
            max_turns,
            trace: None,
        }
    }

    /// Emit debug events for this run under `scope`.
    pub fn with_trace(mut self, scope: &'a TraceScope) -> Self {
        self.trace = Some(scope);
        self
    }

    /// Drive `conversation` to a terminal state. Model failures propagate;
    /// tool failures are fed back to the model as flagged results.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        tally: &mut TurnTally,
    ) -> Result<TurnOutcome, ModelError> {
        let specs = self.tools.specs();

        for turn in 1..=self.max_turns {
            self.emit(
                Category::Protocol,
                EventType::Request,
                "model.complete",
                || {
                    json!({
                        "turn": turn,
                        "model": self.model_name,
                        "messages": conversation.len(),
                        "tools": specs.len(),
                    })
                },
            );

            tally.model_calls += 1;
            let request = ModelRequest {
                model: self.model_name,
                system: self.system,
                messages: conversation.messages(),
                tools: &specs,
            };
            let response = match self.model.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(turn, model = %self.model_name, error = %e, "Model call failed");
                    self.emit(Category::Protocol, EventType::Error, "model.complete", || {
                        json!({ "turn": turn, "error": e.to_string() })
                    });
                    return Err(e);
                }
            };
            tally.usage.add(response.usage);

            let message = Message {
                role: Role::Assistant,
                content: response.content,
            };
            let calls: Vec<(String, String, serde_json::Value)> = message
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            let text = message.text();

            self.emit(Category::Protocol, EventType::Response, "model.complete", || {
                json!({
                    "turn": turn,
                    "usage": response.usage,
                    "toolCalls": calls.len(),
                    "text": self.truncate(&text),
                })
            });
            conversation.push(message);

            if calls.is_empty() {
                tracing::debug!(turn, "Turn loop completed");
                return Ok(TurnOutcome::Completed(text));
            }

            self.emit(Category::Tool, EventType::Turn, "turn", || {
                json!({
                    "turn": turn,
                    "tools": calls.iter().map(|(_, name, _)| name.as_str()).collect::<Vec<_>>(),
                })
            });

            let mut results = Vec::with_capacity(calls.len());
            for (id, name, input) in calls {
                tally.record_tool(&name);
                self.emit(Category::Tool, EventType::ToolCall, &name, || {
                    json!({ "toolUseId": id, "input": self.truncate(&input.to_string()) })
                });
                tracing::debug!(turn, tool = %name, "Dispatching tool call");

                let output = self.tools.dispatch(&name, input).await;
                if output.is_error {
                    tracing::debug!(tool = %name, "Tool returned an error result");
                }
                self.emit(Category::Tool, EventType::ToolResult, &name, || {
                    json!({
                        "toolUseId": id,
                        "isError": output.is_error,
                        "content": self.truncate(&output.content),
                    })
                });

                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: output.content,
                    is_error: output.is_error,
                });
            }
            conversation.push(Message {
                role: Role::User,
                content: results,
            });
        }

        tracing::info!(max_turns = self.max_turns, "Turn budget exhausted");
        // Keep user/assistant alternation intact for the next exchange.
        conversation.push(Message::assistant(BUDGET_EXHAUSTED_MESSAGE));
        Ok(TurnOutcome::BudgetExhausted)
    }

    fn emit(
        &self,
        category: Category,
        kind: EventType,
        method: &str,
        payload: impl FnOnce() -> serde_json::Value,
    ) {
        if let Some(scope) = self.trace {
            if scope.bus().is_enabled() {
                scope.emit_as(category, kind, method, payload());
            }
        }
    }

    fn truncate(&self, text: &str) -> serde_json::Value {
        match self.trace {
            Some(scope) => scope.truncate(text),
            None => serde_json::Value::Null,
        }
    }
}
