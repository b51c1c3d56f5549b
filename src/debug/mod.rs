//! Cross-process debug/observability bus.
//!
//! Every layer reports lifecycle events through a [`TraceScope`], which stamps
//! them with the invocation's `requestId`/`parentRequestId` before handing them
//! to the process-wide [`DebugBus`]. The bus either fans events out to local
//! stream subscribers (the listener process) or pushes them to the listener
//! over HTTP (every other process). Emission never blocks and never fails.

pub mod event;
pub mod listener;
pub mod push;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::DebugConfig;
pub use event::{Category, DebugEvent, EventType, TRUNCATION_MARKER, TruncatedText, truncate_text};
use push::PushDelivery;

const BROADCAST_CAPACITY: usize = 1024;

enum Delivery {
    Disabled,
    Direct(broadcast::Sender<DebugEvent>),
    Push(Arc<PushDelivery>),
}

pub struct DebugBus {
    source: String,
    max_payload_chars: usize,
    delivery: Delivery,
}

impl DebugBus {
    /// A bus that drops everything.
    pub fn disabled() -> Self {
        Self {
            source: "disabled".into(),
            max_payload_chars: usize::MAX,
            delivery: Delivery::Disabled,
        }
    }

    /// In-process fan-out for the process that terminates the event stream.
    pub fn direct(source: impl Into<String>, max_payload_chars: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            source: source.into(),
            max_payload_chars,
            delivery: Delivery::Direct(tx),
        }
    }

    /// Push every event to `endpoint`, backing off for `cooldown` after a
    /// refused connection.
    pub fn push(
        source: impl Into<String>,
        endpoint: impl Into<String>,
        cooldown: Duration,
        max_payload_chars: usize,
    ) -> Self {
        Self {
            source: source.into(),
            max_payload_chars,
            delivery: Delivery::Push(Arc::new(PushDelivery::new(endpoint, cooldown))),
        }
    }

    /// Bus for an ordinary (non-listener) process.
    pub fn from_config(config: &DebugConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self::push(
            config.source.clone(),
            config.push_endpoint(),
            Duration::from_secs(config.push_cooldown_secs),
            config.max_payload_chars,
        )
    }

    /// Bus for the listener process itself.
    pub fn for_listener(config: &DebugConfig) -> Self {
        Self::direct("listener", config.max_payload_chars)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn max_payload_chars(&self) -> usize {
        self.max_payload_chars
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.delivery, Delivery::Disabled)
    }

    /// A fresh event stamped with this bus's source.
    pub fn event(&self, category: Category, kind: EventType) -> DebugEvent {
        DebugEvent::new(category, kind, self.source.clone())
    }

    /// Deliver an event. Any failure is swallowed.
    pub fn emit(&self, event: DebugEvent) {
        match &self.delivery {
            Delivery::Disabled => {}
            Delivery::Direct(tx) => {
                // No subscribers is not an error.
                let _ = tx.send(event);
            }
            Delivery::Push(push) => push.dispatch(event),
        }
    }

    /// Wait up to `limit` for pushed events still in flight. A no-op for
    /// direct and disabled delivery.
    pub async fn flush(&self, limit: Duration) {
        if let Delivery::Push(push) = &self.delivery {
            push.flush(limit).await;
        }
    }

    /// Live stream of events. Only available with direct delivery.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<DebugEvent>> {
        match &self.delivery {
            Delivery::Direct(tx) => Some(tx.subscribe()),
            _ => None,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match &self.delivery {
            Delivery::Direct(tx) => tx.receiver_count(),
            _ => 0,
        }
    }

    /// Truncate a text field to this bus's payload budget.
    pub fn truncate(&self, text: &str) -> serde_json::Value {
        serde_json::to_value(truncate_text(text, self.max_payload_chars))
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Correlation context for one invocation (an orchestrator `chat` call or a
/// specialist spawn). Cheap to clone.
#[derive(Clone)]
pub struct TraceScope {
    bus: Arc<DebugBus>,
    category: Category,
    request_id: String,
    parent_request_id: Option<String>,
    specialist: Option<String>,
}

impl TraceScope {
    pub fn new(
        bus: Arc<DebugBus>,
        category: Category,
        request_id: impl Into<String>,
        parent_request_id: Option<String>,
    ) -> Self {
        Self {
            bus,
            category,
            request_id: request_id.into(),
            parent_request_id,
            specialist: None,
        }
    }

    pub fn with_specialist(mut self, specialist: impl Into<String>) -> Self {
        self.specialist = Some(specialist.into());
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn parent_request_id(&self) -> Option<&str> {
        self.parent_request_id.as_deref()
    }

    pub fn specialist(&self) -> Option<&str> {
        self.specialist.as_deref()
    }

    pub fn bus(&self) -> &Arc<DebugBus> {
        &self.bus
    }

    /// Emit in this scope's own category.
    pub fn emit(&self, kind: EventType, method: &str, payload: serde_json::Value) {
        self.emit_as(self.category, kind, method, payload);
    }

    /// Emit under another layer's category, keeping this scope's correlation.
    pub fn emit_as(
        &self,
        category: Category,
        kind: EventType,
        method: &str,
        payload: serde_json::Value,
    ) {
        if !self.bus.is_enabled() {
            return;
        }
        let event = self
            .bus
            .event(category, kind)
            .with_request(&self.request_id, self.parent_request_id.as_deref())
            .with_specialist(self.specialist.as_deref())
            .with_method(method)
            .with_payload(payload);
        self.bus.emit(event);
    }

    pub fn truncate(&self, text: &str) -> serde_json::Value {
        self.bus.truncate(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_bus_fans_out_to_every_subscriber() {
        let bus = DebugBus::direct("test", 100);
        let mut a = bus.subscribe().unwrap();
        let mut b = bus.subscribe().unwrap();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(bus.event(Category::System, EventType::Session));

        assert_eq!(a.recv().await.unwrap().kind, EventType::Session);
        assert_eq!(b.recv().await.unwrap().source, "test");
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let bus = DebugBus::direct("test", 100);
        bus.emit(bus.event(Category::System, EventType::Session));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn disabled_bus_has_no_stream() {
        let bus = DebugBus::disabled();
        assert!(!bus.is_enabled());
        assert!(bus.subscribe().is_none());
        bus.emit(bus.event(Category::System, EventType::Error));
    }

    #[tokio::test]
    async fn scope_stamps_correlation_ids() {
        let bus = Arc::new(DebugBus::direct("test", 100));
        let mut rx = bus.subscribe().unwrap();
        let scope = TraceScope::new(
            bus.clone(),
            Category::Specialist,
            "child",
            Some("parent".into()),
        )
        .with_specialist("email");

        scope.emit(EventType::Spawn, "spawn", serde_json::json!({"task": "x"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.category, Category::Specialist);
        assert_eq!(event.request_id.as_deref(), Some("child"));
        assert_eq!(event.parent_request_id.as_deref(), Some("parent"));
        assert_eq!(event.specialist.as_deref(), Some("email"));
        assert_eq!(event.method.as_deref(), Some("spawn"));
    }

    #[test]
    fn bus_truncate_reports_original_length() {
        let bus = DebugBus::direct("test", 3);
        let value = bus.truncate("abcdef");
        assert_eq!(value["originalLength"], 6);
        assert_eq!(value["truncated"], true);
        assert_eq!(value["value"], format!("abc{TRUNCATION_MARKER}"));
    }
}
