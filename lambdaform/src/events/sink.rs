//! Sinks for deployment progress.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

/// Receives progress events from drivers and the orchestrator.
///
/// Event types are dot-separated, resource kind first (`deploy.started`,
/// `endpoint.removed`, `domain.certificate_pending`). Payloads are free-form
/// JSON.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event from synchronous code. Must never panic.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// One recorded progress event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Dot-separated event type.
    pub event_type: String,
    /// Payload, when the emitter attached one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// When the sink received the event.
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    fn new(event_type: &str, data: Option<Value>) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
            at: Utc::now(),
        }
    }

    /// The resource kind, i.e. the part before the first dot.
    pub fn kind(&self) -> &str {
        self.event_type.split('.').next().unwrap_or_default()
    }

    /// True for a `*.reconciled` event whose action was `unchanged`.
    pub fn is_noop(&self) -> bool {
        self.event_type.ends_with(".reconciled")
            && self
                .data
                .as_ref()
                .and_then(|d| d.get("action"))
                .and_then(Value::as_str)
                == Some("unchanged")
    }
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// A sink that forwards events to `tracing`.
///
/// Unchanged resources are logged at `debug` only when verbose. Everything
/// else is logged at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink {
    verbose: bool,
}

impl LoggingEventSink {
    /// Creates a sink that also logs unchanged resources at `debug`.
    #[must_use]
    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    fn log(&self, event: &ProgressEvent) {
        if event.is_noop() {
            if self.verbose {
                debug!(event_type = %event.event_type, resource = event.kind(), "unchanged");
            }
            return;
        }
        info!(
            event_type = %event.event_type,
            resource = event.kind(),
            event_data = ?event.data,
            "{}",
            event.event_type
        );
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log(&ProgressEvent::new(event_type, data));
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log(&ProgressEvent::new(event_type, data));
    }
}

/// A sink that records every event, for tests and progress reports.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<ProgressEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }

    /// Returns the recorded event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Returns the payload of the most recent event of `event_type`.
    #[must_use]
    pub fn last_payload(&self, event_type: &str) -> Option<Value> {
        self.events
            .read()
            .iter()
            .rev()
            .find(|e| e.event_type == event_type)
            .and_then(|e| e.data.clone())
    }

    /// Returns the events for one resource kind.
    #[must_use]
    pub fn events_for(&self, kind: &str) -> Vec<ProgressEvent> {
        self.events.read().iter().filter(|e| e.kind() == kind).cloned().collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops everything recorded so far.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push(ProgressEvent::new(event_type, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit("deploy.started", None).await;
        let sink = LoggingEventSink::verbose();
        sink.emit("role.reconciled", Some(json!({"action": "unchanged"}))).await;
        sink.try_emit("role.created", None);
    }

    #[test]
    fn test_progress_event_kind_and_noop() {
        let noop = ProgressEvent::new("alias.reconciled", Some(json!({"action": "unchanged"})));
        assert_eq!(noop.kind(), "alias");
        assert!(noop.is_noop());

        let created = ProgressEvent::new("alias.reconciled", Some(json!({"action": "created"})));
        assert!(!created.is_noop());
        assert!(!ProgressEvent::new("deploy.started", None).is_noop());
    }

    #[tokio::test]
    async fn test_collecting_sink_order_and_lookup() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("deploy.started", None).await;
        sink.try_emit("endpoint.created", Some(json!({"path": "/a"})));
        sink.try_emit("endpoint.created", Some(json!({"path": "/b"})));
        sink.emit("deploy.completed", None).await;

        assert_eq!(
            sink.event_types(),
            vec!["deploy.started", "endpoint.created", "endpoint.created", "deploy.completed"]
        );
        assert_eq!(sink.events_for("endpoint").len(), 2);
        assert_eq!(sink.last_payload("endpoint.created"), Some(json!({"path": "/b"})));
        assert_eq!(sink.last_payload("deploy.started"), None);

        sink.clear();
        assert_eq!(sink.len(), 0);
    }
}
