//! Debug event shape and payload truncation.

use serde::{Deserialize, Serialize};

/// Appended to any text cut down to the payload budget.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Layer that produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Protocol,
    Orchestrator,
    Specialist,
    Tool,
    System,
}

/// Lifecycle phase an event marks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Request,
    Response,
    Turn,
    Spawn,
    ToolCall,
    ToolResult,
    Session,
    Error,
}

/// A structured, correlated lifecycle event.
///
/// `type`, `timestamp`, `category` and `source` are required on the wire;
/// everything else is optional so foreign producers can push minimal events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub timestamp: String,
    pub category: Category,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl DebugEvent {
    pub fn new(category: Category, kind: EventType, source: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: now_iso(),
            category,
            source: source.into(),
            request_id: None,
            parent_request_id: None,
            specialist: None,
            method: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_request(mut self, request_id: &str, parent_request_id: Option<&str>) -> Self {
        self.request_id = Some(request_id.to_string());
        self.parent_request_id = parent_request_id.map(str::to_string);
        self
    }

    pub fn with_specialist(mut self, specialist: Option<&str>) -> Self {
        self.specialist = specialist.map(str::to_string);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A possibly-shortened text field. `original_length` is always the
/// untruncated character count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncatedText {
    pub value: String,
    pub original_length: usize,
    pub truncated: bool,
}

/// Cut `text` to `max_chars` characters plus [`TRUNCATION_MARKER`].
///
/// Counts characters rather than bytes so multi-byte text never splits inside
/// a code point.
pub fn truncate_text(text: &str, max_chars: usize) -> TruncatedText {
    let original_length = text.chars().count();
    if original_length <= max_chars {
        return TruncatedText {
            value: text.to_string(),
            original_length,
            truncated: false,
        };
    }

    let mut value: String = text.chars().take(max_chars).collect();
    value.push_str(TRUNCATION_MARKER);
    TruncatedText {
        value,
        original_length,
        truncated: true,
    }
}

/// Current UTC time as ISO 8601 with milliseconds.
pub fn now_iso() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}
