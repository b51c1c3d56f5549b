//! Built-in utility tools available to every specialist.

use chrono::{Local, NaiveDate};
use serde_json::json;

use super::ToolOutput;
use crate::model::ToolSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalTool {
    CurrentTime,
    DateDiff,
}

impl LocalTool {
    pub const ALL: [LocalTool; 2] = [LocalTool::CurrentTime, LocalTool::DateDiff];

    pub fn name(self) -> &'static str {
        match self {
            LocalTool::CurrentTime => "current_time",
            LocalTool::DateDiff => "date_diff",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn spec(self) -> ToolSpec {
        match self {
            LocalTool::CurrentTime => ToolSpec {
                name: self.name().into(),
                description: "Get the current local date, time, weekday and UTC offset.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            LocalTool::DateDiff => ToolSpec {
                name: self.name().into(),
                description: "Count the days between two dates (YYYY-MM-DD). \
                              `to` defaults to today. Negative when `to` is earlier."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "from": {
                            "type": "string",
                            "description": "Start date, YYYY-MM-DD"
                        },
                        "to": {
                            "type": "string",
                            "description": "End date, YYYY-MM-DD (default: today)"
                        }
                    },
                    "required": ["from"]
                }),
            },
        }
    }

    pub fn execute(self, input: &serde_json::Value) -> ToolOutput {
        match self {
            LocalTool::CurrentTime => current_time(),
            LocalTool::DateDiff => date_diff(input),
        }
    }
}

fn current_time() -> ToolOutput {
    let now = Local::now();
    ToolOutput::json(&json!({
        "iso": now.to_rfc3339(),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M").to_string(),
        "weekday": now.format("%A").to_string(),
        "utcOffset": now.format("%:z").to_string(),
    }))
}

fn date_diff(input: &serde_json::Value) -> ToolOutput {
    let from = match input.get("from").and_then(|v| v.as_str()) {
        Some(s) => s,
        None => return ToolOutput::error("date_diff: missing or invalid 'from' argument"),
    };
    let from = match parse_date(from) {
        Ok(d) => d,
        Err(e) => return ToolOutput::error(format!("date_diff: {e}")),
    };
    let to = match input.get("to").and_then(|v| v.as_str()) {
        Some(s) => match parse_date(s) {
            Ok(d) => d,
            Err(e) => return ToolOutput::error(format!("date_diff: {e}")),
        },
        None => Local::now().date_naive(),
    };

    ToolOutput::json(&json!({
        "from": from.to_string(),
        "to": to.to_string(),
        "days": (to - from).num_days(),
    }))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date `{s}` (expected YYYY-MM-DD): {e}"))
}
