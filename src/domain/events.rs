//! Lifecycle events and the sink abstraction the orchestrator reports through.
//!
//! The orchestrator writes events synchronously as work happens; the boundary
//! layer decides what a sink does with them — collect for a batch response,
//! forward to an NDJSON stream, or print to a terminal. Emission is always a
//! discrete non-blocking hand-off: a slow or dead consumer never stalls the
//! remediation it is observing.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Progress,
    PingResult,
    ResetAttempt,
    ResetSuccess,
    ResetError,
    BatchVerificationStart,
    VerificationProgress,
    VerificationSuccess,
    VerificationFailed,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub timestamp: String,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            address: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn at(mut self, location: &str, address: &str) -> Self {
        self.location = Some(location.to_string());
        self.address = Some(address.to_string());
        self
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards everything. For callers that want no observability.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Collects events in emission order for a buffered (non-streaming) response.
#[derive(Default)]
pub struct BufferSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_events(self) -> Vec<ProgressEvent> {
        self.events.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for BufferSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Forwards each event through an unbounded channel as it is produced.
///
/// Send failures (receiver gone) are ignored — reporting is best-effort and
/// must never abort the work it describes.
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_preserves_emission_order() {
        let sink = BufferSink::new();
        sink.emit(ProgressEvent::new(EventKind::Start, "a"));
        sink.emit(ProgressEvent::new(EventKind::Progress, "b"));
        sink.emit(ProgressEvent::new(EventKind::Complete, "c"));

        let events = sink.into_events();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Start, EventKind::Progress, EventKind::Complete]
        );
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);

        sink.emit(ProgressEvent::new(EventKind::Start, "starting").at("Lobby", "10.0.0.1"));
        drop(sink);

        let event = rx.recv().await.expect("event forwarded");
        assert_eq!(event.kind, EventKind::Start);
        assert_eq!(event.location.as_deref(), Some("Lobby"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        // Must not panic or block.
        sink.emit(ProgressEvent::new(EventKind::Error, "nobody listening"));
    }

    #[test]
    fn event_serializes_with_type_tag_and_skips_empty_fields() {
        let event = ProgressEvent::new(EventKind::PingResult, "10.0.0.1 is reachable");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ping_result");
        assert!(json.get("location").is_none());
        assert!(json["timestamp"].is_string());

        let event = event.at("Lobby", "10.0.0.1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["location"], "Lobby");
        assert_eq!(json["address"], "10.0.0.1");
    }
}
