//! Specialist spawner.
//!
//! Each [`Spawner::spawn`] call is an isolated invocation: a fresh request
//! id, freshly opened provider connections, an ephemeral conversation, and a
//! turn loop bounded by the configured wall-clock timeout. Whatever happens
//! inside, the connections are closed before the result is returned and
//! failures come back as a [`SpawnResult`] with `success: false`.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::definition::SpecialistDefinition;
use super::toolset::SpecialistToolSet;
use crate::agent::turn_loop::{TurnLoop, TurnOutcome, TurnTally};
use crate::context::RuntimeContext;
use crate::debug::{Category, EventType, TraceScope};
use crate::error::SpawnError;
use crate::model::{Conversation, Message, TokenUsage};
use crate::provider::ConnectionSet;
use crate::redact::redact_credentials;

/// One unit of delegated work.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub specialist: String,
    pub task: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Set by the caller, never by the model.
    #[serde(skip)]
    pub parent_request_id: Option<String>,
}

impl SpawnRequest {
    pub fn new(specialist: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            specialist: specialist.into(),
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_parent(mut self, parent_request_id: impl Into<String>) -> Self {
        self.parent_request_id = Some(parent_request_id.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }
}

/// Outcome of one invocation, serialized back to the orchestrator's model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnResult {
    pub request_id: String,
    pub specialist: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tokens_used: TokenUsage,
    pub tools_used: Vec<String>,
    /// Providers that could not be connected for this invocation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable_providers: Vec<String>,
    pub duration_ms: u64,
}

/// Runs specialist invocations against a shared [`RuntimeContext`].
#[derive(Clone)]
pub struct Spawner {
    ctx: Arc<RuntimeContext>,
}

impl Spawner {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    pub async fn spawn(&self, request: SpawnRequest) -> SpawnResult {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let scope = TraceScope::new(
            self.ctx.debug.clone(),
            Category::Specialist,
            request_id.clone(),
            request.parent_request_id.clone(),
        )
        .with_specialist(request.specialist.clone());

        scope.emit(
            EventType::Spawn,
            "spawn.start",
            json!({
                "task": scope.truncate(&request.task),
                "hasContext": request.context.is_some(),
                "maxTurns": request.max_turns,
            }),
        );
        tracing::info!(
            request_id = %request_id,
            parent = ?request.parent_request_id,
            specialist = %request.specialist,
            "Spawning specialist"
        );

        let mut tally = TurnTally::default();
        let mut unavailable = Vec::new();
        let outcome = match self.ctx.specialists.get(&request.specialist) {
            Some(def) => {
                self.run_invocation(def, &request, &scope, &mut tally, &mut unavailable)
                    .await
            }
            None => Err(SpawnError::UnknownSpecialist {
                name: request.specialist.clone(),
            }),
        };

        let mut result = SpawnResult {
            request_id,
            specialist: request.specialist.clone(),
            success: false,
            response: None,
            error: None,
            tokens_used: tally.usage,
            tools_used: tally.tools_used,
            unavailable_providers: unavailable,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        match outcome {
            Ok(text) => {
                result.success = true;
                result.response = Some(text);
                scope.emit(
                    EventType::Response,
                    "spawn.complete",
                    json!({
                        "tokensUsed": result.tokens_used,
                        "toolsUsed": result.tools_used,
                        "durationMs": result.duration_ms,
                    }),
                );
            }
            Err(e) => {
                let message = redact_credentials(&e.to_string());
                tracing::warn!(
                    request_id = %result.request_id,
                    specialist = %result.specialist,
                    error = %message,
                    "Specialist failed"
                );
                scope.emit(
                    EventType::Error,
                    "spawn.failed",
                    json!({
                        "error": scope.truncate(&message),
                        "tokensUsed": result.tokens_used,
                        "durationMs": result.duration_ms,
                    }),
                );
                result.error = Some(message);
            }
        }
        result
    }

    /// Run every request concurrently and return results in request order.
    /// One failure never affects the others.
    pub async fn spawn_parallel(
        &self,
        requests: Vec<SpawnRequest>,
        parent_request_id: Option<&str>,
    ) -> Vec<SpawnResult> {
        let requests = requests.into_iter().map(|mut request| {
            if let Some(parent) = parent_request_id {
                request.parent_request_id = Some(parent.to_string());
            }
            request
        });
        join_all(requests.map(|request| self.spawn(request))).await
    }

    /// Connect, run, close. The connection set is closed on every path out
    /// of this function, including a model error and the timeout.
    async fn run_invocation(
        &self,
        def: &SpecialistDefinition,
        request: &SpawnRequest,
        scope: &TraceScope,
        tally: &mut TurnTally,
        unavailable: &mut Vec<String>,
    ) -> Result<String, SpawnError> {
        let manager = &self.ctx.connections;
        let batch = manager.connect_many(&def.providers).await;

        for failure in &batch.failures {
            unavailable.push(failure.provider().to_string());
            scope.emit_as(
                Category::System,
                EventType::Error,
                "provider.connect",
                json!({
                    "provider": failure.provider(),
                    "error": redact_credentials(&failure.to_string()),
                }),
            );
        }

        let connections = ConnectionSet::new(manager.clone(), batch.connections);
        if !def.providers.is_empty() && connections.is_empty() {
            connections.close().await;
            return Err(SpawnError::NoProvidersConnected {
                specialist: def.name.clone(),
                failed: unavailable.len(),
            });
        }

        let timeout = self.ctx.specialist_timeout();
        let outcome = {
            let tools = SpecialistToolSet::build(
                connections.connections(),
                &self.ctx.domain_tools,
                &def.tools,
            );
            let system = system_prompt(def, unavailable);
            let model_name = self.ctx.config.model_for_tier(def.model_tier.as_deref());
            let max_turns = request
                .max_turns
                .or(def.max_turns)
                .unwrap_or(self.ctx.config.specialist_max_turns);

            scope.emit(
                EventType::Turn,
                "spawn.ready",
                json!({
                    "model": model_name,
                    "maxTurns": max_turns,
                    "providers": connections.len(),
                    "tools": tools.names(),
                }),
            );

            let mut conversation = Conversation::new();
            conversation.push(Message::user(seed_message(&request.task, request.context.as_deref())));

            let turn_loop = TurnLoop::new(
                self.ctx.model.as_ref(),
                model_name,
                &system,
                &tools,
                max_turns,
            )
            .with_trace(scope);

            tokio::time::timeout(timeout, turn_loop.run(&mut conversation, tally)).await
        };

        connections.close().await;

        match outcome {
            Ok(Ok(TurnOutcome::Completed(text))) => Ok(text),
            Ok(Ok(TurnOutcome::BudgetExhausted)) => Ok(TurnOutcome::BudgetExhausted.into_text()),
            Ok(Err(e)) => Err(SpawnError::Model(e)),
            Err(_) => Err(SpawnError::Timeout {
                specialist: def.name.clone(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

fn seed_message(task: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.trim().is_empty() => {
            format!("Context:\n{context}\n\nTask:\n{task}")
        }
        _ => task.to_string(),
    }
}

fn system_prompt(def: &SpecialistDefinition, unavailable: &[String]) -> String {
    if unavailable.is_empty() {
        return def.system_prompt.clone();
    }
    format!(
        "{}\n\nNote: these tool providers are unavailable for this task: {}. \
         Work with the tools you have and say what you could not do.",
        def.system_prompt,
        unavailable.join(", ")
    )
}
