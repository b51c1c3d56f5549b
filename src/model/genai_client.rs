//! [`ModelClient`] backed by the `genai` multi-provider client.
//!
//! The conversation is rebuilt into a `genai` chat request on every call and
//! the response is consumed as a stream with content, tool-call and usage
//! capture enabled; only the captured end-of-stream state is used.

use async_trait::async_trait;
use futures::StreamExt;
use genai::Client;
use genai::chat::{
    ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, Tool, ToolCall, ToolResponse,
};

use super::{ContentBlock, Message, ModelClient, ModelRequest, ModelResponse, Role, TokenUsage};
use crate::error::ModelError;

/// Production model client. Provider selection follows `genai`'s model-name
/// conventions, with credentials taken from the process environment.
#[derive(Clone, Default)]
pub struct GenaiModel {
    client: Client,
}

impl GenaiModel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelClient for GenaiModel {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let chat_req = build_chat_request(&request);

        let chat_options = ChatOptions::default()
            .with_capture_content(true)
            .with_capture_tool_calls(true)
            .with_capture_usage(true);

        let stream_res = self
            .client
            .exec_chat_stream(request.model, chat_req, Some(&chat_options))
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let mut stream = stream_res.stream;
        let mut response = ModelResponse::default();
        let mut ended = false;

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::End(end)) => {
                    ended = true;
                    if let Some(text) = end.captured_first_text() {
                        if !text.is_empty() {
                            response.content.push(ContentBlock::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                    if let Some(calls) = end.captured_tool_calls() {
                        for call in calls {
                            response.content.push(ContentBlock::ToolUse {
                                id: call.call_id.clone(),
                                name: call.fn_name.clone(),
                                input: call.fn_arguments.clone(),
                            });
                        }
                    }
                    if let Some(usage) = &end.captured_usage {
                        response.usage = TokenUsage {
                            input_tokens: usage.prompt_tokens.unwrap_or(0).max(0) as u64,
                            output_tokens: usage.completion_tokens.unwrap_or(0).max(0) as u64,
                        };
                    }
                }
                Ok(_) => {
                    // Start, text and tool-call chunks: the End event carries the captures.
                }
                Err(e) => return Err(ModelError::Stream(e.to_string())),
            }
        }

        if !ended {
            return Err(ModelError::Stream("stream ended without an end event".into()));
        }
        if response.content.is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(response)
    }
}

/// Translate our conversation into a `genai` chat request.
fn build_chat_request(request: &ModelRequest<'_>) -> ChatRequest {
    let tools: Vec<Tool> = request
        .tools
        .iter()
        .map(|spec| {
            Tool::new(spec.name.clone())
                .with_description(spec.description.clone())
                .with_schema(spec.input_schema.clone())
        })
        .collect();

    let mut chat_req = ChatRequest::from_system(request.system);
    if !tools.is_empty() {
        chat_req = chat_req.with_tools(tools);
    }

    for message in request.messages {
        for chat_message in to_chat_messages(message) {
            chat_req = chat_req.append_message(chat_message);
        }
    }
    chat_req
}

/// One of our messages may expand to several `genai` messages: tool results
/// are individual tool-role messages, and an assistant turn's tool calls are
/// carried separately from its text.
fn to_chat_messages(message: &Message) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    let text = message.text();

    match message.role {
        Role::User => {
            if !text.is_empty() {
                out.push(ChatMessage::user(text));
            }
            for block in &message.content {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } = block
                {
                    let body = if *is_error {
                        format!("[error] {content}")
                    } else {
                        content.clone()
                    };
                    out.push(ToolResponse::new(tool_use_id.clone(), body).into());
                }
            }
        }
        Role::Assistant => {
            if !text.is_empty() {
                out.push(ChatMessage::assistant(text));
            }
            let calls: Vec<ToolCall> = message
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| ToolCall {
                    call_id: id.to_string(),
                    fn_name: name.to_string(),
                    fn_arguments: input.clone(),
                    thought_signatures: None,
                })
                .collect();
            if !calls.is_empty() {
                out.push(ChatMessage::from(calls));
            }
        }
    }
    out
}
