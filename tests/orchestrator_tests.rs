mod common;

use serde_json::json;

use common::{FakeProvider, ScriptedModel, drain, harness, model_error, specialist, test_config, text, tool_calls};
use conductor::agent::{BUDGET_EXHAUSTED_MESSAGE, CHAT_FAILED_MESSAGE, Orchestrator};
use conductor::debug::{Category, EventType};
use conductor::model::{ContentBlock, Message, Role};

const ORCHESTRATOR: &str = "You are a personal assistant";

/// The (content, is_error) of every tool result in `message`.
fn tool_results(message: &Message) -> Vec<(String, bool)> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

fn assert_alternates(history: &[Message]) {
    assert_eq!(history.first().map(|m| m.role), Some(Role::User));
    for pair in history.windows(2) {
        assert_ne!(pair[0].role, pair[1].role, "roles must alternate");
    }
}

// ============================================================
// Direct answers and history
// ============================================================

#[tokio::test]
async fn test_direct_answer_without_tools() {
    let model = ScriptedModel::default();
    model.script(ORCHESTRATOR, vec![text("Hello there.")]);
    let h = harness(test_config(vec![specialist("email", &[])], &[]), model, &[]);
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    let answer = orchestrator.chat("hi").await;

    assert_eq!(answer, "Hello there.");
    assert_eq!(orchestrator.history().len(), 2);
    assert_eq!(orchestrator.usage().total(), 15);

    let seen = h.model.seen();
    assert!(seen[0].system.contains("- email: Handles email"));
    assert_eq!(
        seen[0].tools,
        vec!["list_specialists", "spawn_specialist", "spawn_parallel"]
    );
}

#[tokio::test]
async fn test_clear_resets_history_but_keeps_usage() {
    let model = ScriptedModel::default();
    model.script(ORCHESTRATOR, vec![text("one"), text("two")]);
    let h = harness(test_config(vec![], &[]), model, &[]);
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    orchestrator.chat("first").await;
    orchestrator.clear();
    assert!(orchestrator.history().is_empty());
    assert_eq!(orchestrator.usage().total(), 15);

    orchestrator.chat("second").await;
    assert_eq!(orchestrator.history().len(), 2);
    assert_eq!(h.model.seen()[1].messages, 1);
}

#[tokio::test]
async fn test_list_specialists_returns_summaries() {
    let model = ScriptedModel::default();
    model.script(
        ORCHESTRATOR,
        vec![
            tool_calls(&[("t1", "list_specialists", json!({}))]),
            text("You have an email specialist."),
        ],
    );
    let h = harness(
        test_config(vec![specialist("email", &["mail"])], &["mail"]),
        model,
        &[],
    );
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    orchestrator.chat("what can you do?").await;

    let results = tool_results(&orchestrator.history()[2]);
    assert_eq!(results.len(), 1);
    let summaries: serde_json::Value = serde_json::from_str(&results[0].0).unwrap();
    assert_eq!(summaries[0]["name"], "email");
    assert_eq!(summaries[0]["providers"], json!(["mail"]));
    assert!(!results[0].1);
}

// ============================================================
// Delegation
// ============================================================

#[tokio::test]
async fn test_spawn_is_correlated_with_the_chat_request() {
    let model = ScriptedModel::default();
    model.script(
        ORCHESTRATOR,
        vec![
            tool_calls(&[(
                "t1",
                "spawn_specialist",
                json!({"specialist": "email", "task": "email sam about lunch"}),
            )]),
            text("Sam has been emailed."),
        ],
    );
    model.script(
        "You are the email",
        vec![
            tool_calls(&[("s1", "mail__send", json!({"to": "sam"}))]),
            text("Sent."),
        ],
    );
    let h = harness(
        test_config(vec![specialist("email", &["mail"])], &["mail"]),
        model,
        &[("mail", FakeProvider::Healthy(vec!["send"]))],
    );
    let mut rx = h.bus.subscribe().unwrap();
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    let answer = orchestrator.chat("tell sam lunch is at noon").await;
    assert_eq!(answer, "Sam has been emailed.");

    let events = drain(&mut rx);
    let chat = events
        .iter()
        .find(|e| e.category == Category::Orchestrator && e.kind == EventType::Request)
        .expect("chat request event");
    let chat_id = chat.request_id.clone().unwrap();
    assert!(chat.parent_request_id.is_none());

    let spawn = events
        .iter()
        .find(|e| e.kind == EventType::Spawn)
        .expect("spawn event");
    assert_eq!(spawn.parent_request_id.as_deref(), Some(chat_id.as_str()));
    assert_ne!(spawn.request_id.as_deref(), Some(chat_id.as_str()));

    let results = tool_results(&orchestrator.history()[2]);
    let spawned: serde_json::Value = serde_json::from_str(&results[0].0).unwrap();
    assert_eq!(spawned["success"], true);
    assert_eq!(spawned["response"], "Sent.");
    assert_eq!(spawned["toolsUsed"], json!(["mail__send"]));
    assert_eq!(spawned["requestId"], spawn.request_id.clone().unwrap());

    // The specialist never sees the orchestrator's conversation.
    let specialist_call = h
        .model
        .seen()
        .into_iter()
        .find(|s| s.system.starts_with("You are the email"))
        .unwrap();
    assert_eq!(specialist_call.messages, 1);
    assert_eq!(specialist_call.last_user_text, "email sam about lunch");

    assert_eq!(h.log.opened(), h.log.closed());
    // Nested spawn usage is reported in the result, not the session total.
    assert_eq!(orchestrator.usage().total(), 30);
}

#[tokio::test]
async fn test_failed_spawn_is_flagged_and_the_turn_continues() {
    let model = ScriptedModel::default();
    model.script(
        ORCHESTRATOR,
        vec![
            tool_calls(&[(
                "t1",
                "spawn_specialist",
                json!({"specialist": "plumber", "task": "fix the sink"}),
            )]),
            text("I don't have a plumber."),
        ],
    );
    let h = harness(test_config(vec![specialist("email", &[])], &[]), model, &[]);
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    let answer = orchestrator.chat("fix my sink").await;
    assert_eq!(answer, "I don't have a plumber.");

    let results = tool_results(&orchestrator.history()[2]);
    assert!(results[0].1);
    assert!(results[0].0.contains("Unknown specialist: plumber"));
}

#[tokio::test]
async fn test_spawn_parallel_results_follow_task_order() {
    let model = ScriptedModel::default();
    model.script(
        ORCHESTRATOR,
        vec![
            tool_calls(&[(
                "t1",
                "spawn_parallel",
                json!({"tasks": [
                    {"specialist": "calendar", "task": "next meeting"},
                    {"specialist": "email", "task": "unread count"}
                ]}),
            )]),
            text("Meeting at 3, two unread."),
        ],
    );
    model.script("You are the calendar", vec![text("3pm standup")]);
    model.script("You are the email", vec![text("2 unread")]);
    let h = harness(
        test_config(vec![specialist("email", &[]), specialist("calendar", &[])], &[]),
        model,
        &[],
    );
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    orchestrator.chat("status?").await;

    let results = tool_results(&orchestrator.history()[2]);
    let batch: serde_json::Value = serde_json::from_str(&results[0].0).unwrap();
    assert_eq!(batch[0]["specialist"], "calendar");
    assert_eq!(batch[0]["response"], "3pm standup");
    assert_eq!(batch[1]["specialist"], "email");
    assert_eq!(batch[1]["response"], "2 unread");
}

#[tokio::test]
async fn test_spawn_parallel_rejects_empty_task_list() {
    let model = ScriptedModel::default();
    model.script(
        ORCHESTRATOR,
        vec![
            tool_calls(&[("t1", "spawn_parallel", json!({"tasks": []}))]),
            text("Nothing to do."),
        ],
    );
    let h = harness(test_config(vec![specialist("email", &[])], &[]), model, &[]);
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    orchestrator.chat("do nothing in parallel").await;

    let results = tool_results(&orchestrator.history()[2]);
    assert!(results[0].1);
    assert!(results[0].0.contains("no tasks"));
    assert_eq!(h.model.calls(), 2);
}

// ============================================================
// Failure handling
// ============================================================

#[tokio::test]
async fn test_model_error_rolls_back_and_returns_text() {
    let model = ScriptedModel::default();
    model.script(
        ORCHESTRATOR,
        vec![
            text("first answer"),
            tool_calls(&[("t1", "list_specialists", json!({}))]),
            model_error("401 for key sk-ant-REDACTED"),
            text("recovered"),
        ],
    );
    let h = harness(test_config(vec![], &[]), model, &[]);
    let mut rx = h.bus.subscribe().unwrap();
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    orchestrator.chat("one").await;
    let before = orchestrator.history().to_vec();
    drain(&mut rx);

    let answer = orchestrator.chat("two").await;
    assert_eq!(answer, CHAT_FAILED_MESSAGE);
    assert!(!answer.contains("401"));
    assert_eq!(orchestrator.history(), before.as_slice());

    // The cause is reported on the debug bus, redacted.
    let events = drain(&mut rx);
    let failure = events
        .iter()
        .find(|e| e.category == Category::Orchestrator && e.kind == EventType::Error)
        .expect("chat error event");
    let detail = failure.payload["error"]["value"].as_str().unwrap();
    assert!(detail.contains("401"));
    assert!(detail.contains("[REDACTED]"));
    assert!(!detail.contains("abcdefghijklmnop"));

    let answer = orchestrator.chat("three").await;
    assert_eq!(answer, "recovered");
    assert_eq!(orchestrator.history().len(), 4);
    assert_alternates(orchestrator.history());
}

#[tokio::test]
async fn test_budget_exhaustion_keeps_history_well_formed() {
    let mut config = test_config(vec![], &[]);
    config.orchestrator_max_turns = 2;
    let model = ScriptedModel::default();
    model.script(
        ORCHESTRATOR,
        vec![
            tool_calls(&[("t1", "list_specialists", json!({}))]),
            tool_calls(&[("t2", "list_specialists", json!({}))]),
            text("next turn"),
        ],
    );
    let h = harness(config, model, &[]);
    let mut orchestrator = Orchestrator::new(h.ctx.clone());

    let answer = orchestrator.chat("loop forever").await;
    assert_eq!(answer, BUDGET_EXHAUSTED_MESSAGE);
    assert_alternates(orchestrator.history());
    assert_eq!(
        orchestrator.history().last().map(|m| m.role),
        Some(Role::Assistant)
    );

    // The session stays usable.
    assert_eq!(orchestrator.chat("anything else?").await, "next turn");
    assert_alternates(orchestrator.history());
}
